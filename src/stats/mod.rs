//! Per-scope request/response accounting.
//!
//! Grounded on the Go `HttpStatsReporter` (`examples/original_source/httpservice.go`):
//! the same counter/histogram classification, re-expressed as Prometheus
//! metric names plus `scope`/`class` labels instead of per-scope counter
//! objects (see DESIGN.md for the mapping rationale).

use std::sync::Arc;
use std::time::Duration;

/// Outcome of a single dispatch or upstream attempt, as seen by a reporter.
/// `NoResponse` mirrors the Go reporter's "success but nil response" branch;
/// it is unreachable through this crate's own code paths but kept so the
/// classification is complete (see DESIGN.md — `rsp/type_err` has no
/// counterpart at all, since a typed `Response<UpstreamBody>` cannot hold
/// the wrong dynamic type).
pub enum Outcome {
    Error,
    NoResponse,
    Response { status: u16, size: Option<u64> },
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "rst",
    }
}

/// Reports one [`Outcome`] per dispatched request or per upstream attempt,
/// scoped by cluster (or `cluster.host:port` for per-host stats).
pub struct HttpStatsReporter {
    scope: Arc<str>,
}

impl HttpStatsReporter {
    pub fn new(scope: impl Into<Arc<str>>) -> Self {
        Self { scope: scope.into() }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn report(&self, outcome: &Outcome, elapsed: Duration) {
        let scope = self.scope.to_string();
        metrics::histogram!("gateway_req_latency_seconds", "scope" => scope.clone())
            .record(elapsed.as_secs_f64());
        metrics::counter!("gateway_req_total", "scope" => scope.clone()).increment(1);

        match outcome {
            Outcome::Error => {
                metrics::counter!("gateway_req_fail_total", "scope" => scope).increment(1);
            }
            Outcome::NoResponse => {
                metrics::counter!("gateway_req_success_total", "scope" => scope.clone())
                    .increment(1);
                metrics::counter!("gateway_rsp_nil_total", "scope" => scope).increment(1);
            }
            Outcome::Response { status, size } => {
                metrics::counter!("gateway_req_success_total", "scope" => scope.clone())
                    .increment(1);
                let size_val = size.map(|s| s as f64).unwrap_or(-1.0);
                metrics::histogram!("gateway_rsp_size_bytes", "scope" => scope.clone())
                    .record(size_val);
                let class = status_class(*status);
                metrics::counter!(
                    "gateway_rsp_class_total",
                    "scope" => scope.clone(), "class" => class,
                )
                .increment(1);
                metrics::histogram!(
                    "gateway_rsp_size_by_class_bytes",
                    "scope" => scope, "class" => class,
                )
                .record(size_val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_covers_every_band() {
        assert_eq!(status_class(101), "1xx");
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(301), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(0), "rst");
    }

    #[test]
    fn report_does_not_panic_for_every_outcome_variant() {
        let reporter = HttpStatsReporter::new("test-scope");
        reporter.report(&Outcome::Error, Duration::from_millis(5));
        reporter.report(&Outcome::NoResponse, Duration::from_millis(5));
        reporter.report(
            &Outcome::Response { status: 200, size: Some(128) },
            Duration::from_millis(5),
        );
        reporter.report(
            &Outcome::Response { status: 503, size: None },
            Duration::from_millis(5),
        );
    }
}
