#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use hermes_gateway::server;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

/// Grounded on `examples/original_source/tfe_server/tfe_server.go`'s flag set.
#[derive(Parser)]
#[command(name = "hermes-gateway", about = "Rule-based reverse proxy front end")]
struct Cli {
    /// Path to the gateway config file (rule sets and clusters).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Comma-separated rule set names to serve, resolved against the rule
    /// registry built from the config file.
    #[arg(long, default_value = "empty")]
    rules: String,

    /// Listener-side read timeout.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    read_timeout: Duration,

    /// Listener-side write timeout.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    write_timeout: Duration,

    /// Added to every binding's listener port, for running multiple instances.
    #[arg(long, default_value_t = 0)]
    port_offset: i32,

    /// Admin API listen address (health checks and Prometheus metrics).
    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        rules: cli.rules,
        port_offset: cli.port_offset,
        read_timeout: cli.read_timeout,
        write_timeout: cli.write_timeout,
        admin_listen: cli.admin_listen,
    }))
}
