//! A single upstream host wrapped with passive health tracking (§4.4).
//!
//! Grounded on the atomic-state/CAS technique in the teacher's
//! `upstream/circuit_breaker.rs`, generalized down from its three-state
//! Closed/Open/HalfOpen breaker to the spec's simpler two-state Live/Dead
//! machine (see DESIGN.md). Probe semantics (`ProbeSpec::LastFailed`) come
//! from `examples/original_source/factories.go`'s `ProberReqLastFail`.

use crate::body::{clone_request, ReplayableBody};
use crate::stats::{HttpStatsReporter, Outcome};
use crate::upstream::transport::{response_size, TransportError, UpstreamBody, UpstreamTransport};
use crate::upstream::{bits_to_f64, f64_to_bits};
use http::{Request, Response};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a dead supervisor's background probe is built.
#[derive(Clone)]
pub enum ProbeSpec {
    /// Never probe; a dead supervisor can only revive by going through
    /// `serve()` again is impossible here, so it stays dead forever. Used
    /// for clusters that disable probing entirely.
    None,
    /// Replay the most recent failed request (§4.4's `probeRequest` slot).
    LastFailed,
}

/// A shared, lock-free handle to a cluster's exponential moving average of
/// attempt latency. Owned by the [`crate::upstream::cluster::Cluster`];
/// supervisors hold only this query handle, never a reference back to the
/// cluster itself (§9 — avoids a cyclic reference).
#[derive(Default)]
pub struct LatencyEma(AtomicU64);

impl LatencyEma {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(f64_to_bits(0.0))))
    }

    pub fn get(&self) -> f64 {
        bits_to_f64(self.0.load(Ordering::Relaxed))
    }

    pub fn observe(&self, sample_secs: f64, alpha: f64) {
        loop {
            let current_bits = self.0.load(Ordering::Relaxed);
            let current = bits_to_f64(current_bits);
            let next = if current == 0.0 {
                sample_secs
            } else {
                alpha * sample_secs + (1.0 - alpha) * current
            };
            let next_bits = f64_to_bits(next);
            if self
                .0
                .compare_exchange_weak(current_bits, next_bits, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

pub struct Supervisor {
    name: Arc<str>,
    transport: UpstreamTransport,
    timeout: Duration,
    dead: AtomicBool,
    consecutive_failures: AtomicU32,
    dead_threshold: u32,
    probe: ProbeSpec,
    last_failed_request: Mutex<Option<Request<ReplayableBody>>>,
    reporter: Option<Arc<HttpStatsReporter>>,
    latency_ema: Arc<LatencyEma>,
}

impl Supervisor {
    pub fn new(
        name: impl Into<Arc<str>>,
        transport: UpstreamTransport,
        timeout: Duration,
        dead_threshold: u32,
        probe: ProbeSpec,
        reporter: Option<Arc<HttpStatsReporter>>,
        latency_ema: Arc<LatencyEma>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            timeout,
            dead: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            dead_threshold: dead_threshold.max(1),
            probe,
            last_failed_request: Mutex::new(None),
            reporter,
            latency_ema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn latency_avg(&self) -> f64 {
        self.latency_ema.get()
    }

    pub async fn serve(
        &self,
        req: &mut Request<ReplayableBody>,
    ) -> Result<Response<UpstreamBody>, TransportError> {
        let start = Instant::now();
        let result = crate::upstream::timeout::bounded(
            self.timeout,
            self.transport.serve(req, &self.name),
            || TransportError::Timeout,
        )
        .await;
        let elapsed = start.elapsed();

        match &result {
            Ok(resp) => {
                self.report(
                    Outcome::Response { status: resp.status().as_u16(), size: response_size(resp) },
                    elapsed,
                );
                self.on_success();
            }
            Err(_) => {
                self.report(Outcome::Error, elapsed);
                self.on_failure(req);
            }
        }

        result
    }

    fn report(&self, outcome: Outcome, elapsed: Duration) {
        if let Some(reporter) = &self.reporter {
            reporter.report(&outcome, elapsed);
        }
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn on_failure(&self, req: &Request<ReplayableBody>) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.dead_threshold && !self.dead.swap(true, Ordering::AcqRel) {
            tracing::warn!(supervisor = %self.name, failures, "supervisor marked dead");
        }
        if matches!(self.probe, ProbeSpec::LastFailed) {
            *self.last_failed_request.lock().unwrap() = Some(clone_request(req));
        }
    }

    /// One background probe attempt. No-op (returns `false`) unless the
    /// supervisor is currently dead and has a probe request to replay.
    /// Revives the supervisor on success.
    pub async fn probe_once(&self) -> bool {
        if !self.is_dead() {
            return false;
        }
        let mut req = match &self.probe {
            ProbeSpec::None => return false,
            ProbeSpec::LastFailed => match self.last_failed_request.lock().unwrap().as_ref() {
                Some(r) => clone_request(r),
                None => return false,
            },
        };

        match self.transport.serve(&mut req, &self.name).await {
            Ok(_) => {
                self.dead.store(false, Ordering::Release);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                tracing::info!(supervisor = %self.name, "supervisor revived by probe");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::transport::build_client;

    fn test_supervisor(dead_threshold: u32) -> Supervisor {
        let transport = UpstreamTransport::new(build_client(), false);
        Supervisor::new(
            "127.0.0.1:1",
            transport,
            Duration::from_millis(50),
            dead_threshold,
            ProbeSpec::LastFailed,
            None,
            LatencyEma::new(),
        )
    }

    #[tokio::test]
    async fn marks_dead_after_consecutive_failures_reach_threshold() {
        let sup = test_supervisor(2);
        let mut req = Request::builder().uri("/").body(ReplayableBody::empty()).unwrap();
        assert!(sup.serve(&mut req).await.is_err());
        assert!(!sup.is_dead());
        assert!(sup.serve(&mut req).await.is_err());
        assert!(sup.is_dead());
    }

    #[test]
    fn latency_ema_converges_toward_repeated_samples() {
        let ema = LatencyEma::new();
        assert_eq!(ema.get(), 0.0);
        ema.observe(1.0, 0.5);
        assert_eq!(ema.get(), 1.0);
        ema.observe(0.0, 0.5);
        assert_eq!(ema.get(), 0.5);
    }
}
