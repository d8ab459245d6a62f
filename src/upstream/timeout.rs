//! Bounds a single attempt's wall-clock duration (§4.3).
//!
//! Grounded on the teacher's inline `tokio::time::timeout(...)` wrapping of
//! `client.request(...)` in `proxy/handler.rs::phase_upstream`, pulled out
//! into its own named component (mirroring the Go `ServiceWithTimeout`
//! wrapper in `examples/original_source/factories.go`).

use std::future::Future;
use std::time::Duration;

/// Runs `fut`, failing with `on_timeout()` if it does not complete within
/// `duration`. Dropping the future on expiry — which is what
/// `tokio::time::timeout` does — cancels the in-flight I/O rather than
/// merely giving up while bytes are still arriving.
pub async fn bounded<F, T, E>(duration: Duration, fut: F, on_timeout: impl FnOnce() -> E) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline_returns_inner_result() {
        let result: Result<&str, &str> = bounded(
            Duration::from_millis(50),
            async { Ok("ok") },
            || "timed out",
        )
        .await;
        assert_eq!(result, Ok("ok"));
    }

    #[tokio::test]
    async fn expiry_yields_the_timeout_error() {
        let result: Result<&str, &str> = bounded(
            Duration::from_millis(5),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("too late")
            },
            || "timed out",
        )
        .await;
        assert_eq!(result, Err("timed out"));
    }
}
