use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram bucket boundaries for response body size (bytes).
const SIZE_BUCKETS: &[f64] = &[
    100.0, 500.0, 1000.0, 5000.0, 10000.0, 50000.0, 100000.0, 500000.0, 1000000.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_bytes".to_string()),
                SIZE_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---
        //
        // Names mirror `stats::HttpStatsReporter::report` exactly; every
        // metric here carries a `scope` label (cluster name, or
        // `cluster.host:port` when a supervisor has per-host stats enabled)
        // and, where applicable, a `class` label (`1xx`..`5xx`, `rst`).

        describe_histogram!(
            "gateway_req_latency_seconds",
            Unit::Seconds,
            "Time spent serving one dispatch or upstream attempt"
        );
        describe_counter!(
            "gateway_req_total",
            Unit::Count,
            "Total dispatches or upstream attempts"
        );
        describe_counter!(
            "gateway_req_fail_total",
            Unit::Count,
            "Attempts that failed before a response was obtained"
        );
        describe_counter!(
            "gateway_req_success_total",
            Unit::Count,
            "Attempts that produced a response (including nil responses)"
        );
        describe_counter!(
            "gateway_rsp_nil_total",
            Unit::Count,
            "Successful attempts with no response body"
        );
        describe_histogram!(
            "gateway_rsp_size_bytes",
            Unit::Bytes,
            "Response body size; -1 when the size could not be determined"
        );
        describe_counter!(
            "gateway_rsp_class_total",
            Unit::Count,
            "Responses grouped by status class"
        );
        describe_histogram!(
            "gateway_rsp_size_by_class_bytes",
            Unit::Bytes,
            "Response body size grouped by status class"
        );

        // supervisor health (§4.4, ambient — no analogue emitted by the Go
        // reporter, added so passive health state is observable)
        describe_gauge!(
            "gateway_supervisor_dead",
            Unit::Count,
            "Supervisor health: 1=dead 0=live"
        );
        describe_counter!(
            "gateway_probe_total",
            Unit::Count,
            "Background probe attempts against dead supervisors"
        );
        describe_counter!(
            "gateway_probe_revived_total",
            Unit::Count,
            "Background probes that revived a dead supervisor"
        );
        describe_gauge!(
            "gateway_cluster_latency_avg_seconds",
            Unit::Seconds,
            "Exponentially weighted moving average of successful-attempt latency"
        );

        // connections (ambient — listener accept/drain accounting)
        describe_gauge!(
            "gateway_connections_active",
            Unit::Count,
            "Number of active downstream connections"
        );
        describe_counter!(
            "gateway_connections_total",
            Unit::Count,
            "Total connections accepted"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
