//! A named, ordered set of supervised upstreams with bounded retry (§4.5).
//!
//! Grounded on the teacher's `upstream/loadbalance/round_robin.rs` (the
//! atomic-cursor technique, here unweighted since the spec's cluster has no
//! weight concept) and on `proxy/handler.rs::phase_upstream`'s retry loop,
//! reshaped into a single `Cluster::serve`. Unlike the teacher's
//! `ArcSwap<BalancerState>`, the supervisor set here is fixed at
//! construction: §5 states the binding table and rule lists are immutable
//! after startup, and this crate has no reload path, so a plain boxed slice
//! replaces the teacher's swappable membership.

use crate::body::ReplayableBody;
use crate::stats::{HttpStatsReporter, Outcome};
use crate::upstream::supervisor::{LatencyEma, Supervisor};
use crate::upstream::transport::{response_size, TransportError, UpstreamBody};
use dashmap::DashMap;
use http::{Request, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Cluster {
    name: Arc<str>,
    supervisors: Box<[Arc<Supervisor>]>,
    cursor: AtomicU64,
    retries: usize,
    reporter: Option<Arc<HttpStatsReporter>>,
    latency_ema: Arc<LatencyEma>,
    ema_alpha: f64,
    probe_interval: Duration,
}

impl Cluster {
    pub fn new(
        name: impl Into<Arc<str>>,
        supervisors: Vec<Arc<Supervisor>>,
        retries: usize,
        reporter: Option<Arc<HttpStatsReporter>>,
        latency_ema: Arc<LatencyEma>,
        ema_alpha: f64,
    ) -> Arc<Self> {
        Self::with_probe_interval(
            name,
            supervisors,
            retries,
            reporter,
            latency_ema,
            ema_alpha,
            Duration::from_secs(10),
        )
    }

    pub fn with_probe_interval(
        name: impl Into<Arc<str>>,
        supervisors: Vec<Arc<Supervisor>>,
        retries: usize,
        reporter: Option<Arc<HttpStatsReporter>>,
        latency_ema: Arc<LatencyEma>,
        ema_alpha: f64,
        probe_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            supervisors: supervisors.into_boxed_slice(),
            cursor: AtomicU64::new(0),
            retries,
            reporter,
            latency_ema,
            ema_alpha,
            probe_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    pub fn supervisors_snapshot(&self) -> Vec<Arc<Supervisor>> {
        self.supervisors.to_vec()
    }

    pub fn latency_avg(&self) -> f64 {
        self.latency_ema.get()
    }

    /// Attempts the request against up to `retries + 1` distinct live
    /// supervisors, starting from a monotonically advancing cursor.
    ///
    /// - Within a single request, the same supervisor is never retried twice
    ///   while another live supervisor remains untried.
    /// - If fewer live supervisors exist than attempts allowed, live
    ///   supervisors are cycled (each tried at least once before any repeat).
    /// - If every supervisor is dead, one degraded attempt is made against
    ///   the first supervisor in cursor order.
    pub async fn serve(
        self: &Arc<Self>,
        mut req: Request<ReplayableBody>,
    ) -> Result<Response<UpstreamBody>, TransportError> {
        let start = Instant::now();
        let n = self.supervisors.len();

        if n == 0 {
            self.report(Outcome::Error, start.elapsed());
            return Err(TransportError::Timeout);
        }

        let order = self.build_attempt_order(&self.supervisors);
        let mut last_err = None;

        for idx in order {
            let supervisor = &self.supervisors[idx];
            let attempt_start = Instant::now();
            match supervisor.serve(&mut req).await {
                Ok(resp) => {
                    // EMA tracks successful-attempt latency only (§4.5) — the
                    // winning attempt's own duration, not the cumulative
                    // cluster-call time across any prior failed attempts.
                    self.latency_ema.observe(attempt_start.elapsed().as_secs_f64(), self.ema_alpha);
                    self.report(
                        Outcome::Response { status: resp.status().as_u16(), size: response_size(&resp) },
                        start.elapsed(),
                    );
                    return Ok(resp);
                }
                Err(e) => last_err = Some(e),
            }
        }

        self.report(Outcome::Error, start.elapsed());
        Err(last_err.unwrap_or(TransportError::Timeout))
    }

    fn report(&self, outcome: Outcome, elapsed: std::time::Duration) {
        if let Some(reporter) = &self.reporter {
            reporter.report(&outcome, elapsed);
        }
    }

    fn build_attempt_order(&self, supervisors: &[Arc<Supervisor>]) -> Vec<usize> {
        let n = supervisors.len();
        let max_attempts = self.retries + 1;
        let start = (self.cursor.fetch_add(1, Ordering::Relaxed) as usize) % n;

        let mut order = Vec::with_capacity(max_attempts.min(n));
        for i in 0..n {
            let idx = (start + i) % n;
            if !supervisors[idx].is_dead() {
                order.push(idx);
                if order.len() == max_attempts {
                    return order;
                }
            }
        }

        if order.is_empty() {
            return vec![start];
        }

        let live_count = order.len();
        let mut i = 0;
        while order.len() < max_attempts {
            order.push(order[i % live_count]);
            i += 1;
        }
        order
    }
}

/// Process-wide registry of named clusters, built once at startup from
/// config and looked up by name when assembling rule sets.
#[derive(Default)]
pub struct ClusterStore {
    clusters: DashMap<String, Arc<Cluster>>,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cluster: Arc<Cluster>) {
        self.clusters.insert(cluster.name().to_string(), cluster);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.clusters.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::supervisor::ProbeSpec;
    use crate::upstream::transport::{build_client, UpstreamTransport};
    use std::time::Duration;

    fn unreachable_supervisor(name: &str, dead_threshold: u32) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            name.to_string(),
            UpstreamTransport::new(build_client(), false),
            Duration::from_millis(10),
            dead_threshold,
            ProbeSpec::None,
            None,
            LatencyEma::new(),
        ))
    }

    #[test]
    fn build_attempt_order_skips_dead_and_caps_at_retries_plus_one() {
        let cluster = Cluster::new("c", Vec::new(), 1, None, LatencyEma::new(), 0.2);
        let sups: Vec<Arc<Supervisor>> =
            (0..4).map(|i| unreachable_supervisor(&format!("h{i}:1"), 1)).collect();
        let order = cluster.build_attempt_order(&sups);
        assert_eq!(order.len(), 2);
    }

    #[tokio::test]
    async fn build_attempt_order_degrades_to_single_attempt_when_all_dead() {
        let cluster = Cluster::new("c", Vec::new(), 2, None, LatencyEma::new(), 0.2);
        let sup = unreachable_supervisor("127.0.0.1:1", 1);
        let mut req = Request::builder().uri("/").body(ReplayableBody::empty()).unwrap();
        let _ = sup.serve(&mut req).await;
        assert!(sup.is_dead());

        let order = cluster.build_attempt_order(&[sup]);
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn cluster_store_round_trips_by_name() {
        let store = ClusterStore::new();
        let cluster = Cluster::new("primary", Vec::new(), 0, None, LatencyEma::new(), 0.2);
        store.insert(cluster.clone());
        assert_eq!(store.get("primary").unwrap().name(), "primary");
        assert!(store.get("missing").is_none());
    }
}
