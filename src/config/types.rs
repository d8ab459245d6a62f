//! Gateway configuration schema.
//!
//! Grounded on the teacher's `config/types.rs` derive/default style
//! (`#[serde(default = "...")]` per field, `deserialize_null_default` for
//! fields that should treat JSON/TOML `null` as "missing"). The shape itself
//! — named rule-sets of binding → ordered prefix-rewrite rules, pointing at
//! named clusters of upstream nodes — is the data-file stand-in for
//! `examples/original_source/confs/*.go`, which spec §1 places out of scope
//! as "data for the engine"; only the loading mechanism lives here.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn se_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

/// Top-level gateway configuration: the binding table's data source (§3,
/// §4.9) plus the named clusters the rules point into (§4.5's upstream
/// pools).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rule_sets: Vec<RuleSetConfig>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub clusters: Vec<ClusterConfig>,
}

/// One registry entry (§4.9): a name resolved by `--rules`, mapping to one
/// or more listener bindings. Mirrors the Go `AddRules(name, func() map[string]Rules)`
/// shape — one named constructor can cover several `binding: rules` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub name: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub bindings: Vec<BindingConfig>,
}

/// One listener address and the ordered rule list served on it (§3's
/// "binding table" entry, pre-merge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    /// e.g. `:8888` or `0.0.0.0:8888`.
    pub listen: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rules: Vec<PrefixRewriteRuleConfig>,
}

/// One `PrefixRewriteRule` (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixRewriteRuleConfig {
    pub name: String,

    /// Empty matches any `Host` header.
    #[serde(default)]
    pub source_host: String,

    pub source_path_prefix: String,
    pub proxied_path_prefix: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub attach_headers: HashMap<String, String>,

    /// Name of a `ClusterConfig` this rule dispatches to. `None` means the
    /// rule has no configured service — the dispatcher answers every match
    /// with 404 (§4.7 step 4, §7).
    #[serde(default)]
    pub cluster: Option<String>,
}

/// One named cluster: ordered upstream nodes plus the retry/health/stats
/// tuning described in §4.4 and §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,

    /// `host:port` entries, in the order supervisors are built — this order
    /// is also the cluster's round-robin starting order (§4.5).
    pub nodes: Vec<String>,

    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(
        default = "default_attempt_timeout",
        serialize_with = "se_duration",
        deserialize_with = "de_duration"
    )]
    pub timeout: Duration,

    #[serde(default = "default_dead_threshold")]
    pub dead_threshold: u32,

    #[serde(default)]
    pub probe: ProbeKindConfig,

    #[serde(
        default = "default_probe_interval",
        serialize_with = "se_duration",
        deserialize_with = "de_duration"
    )]
    pub probe_interval: Duration,

    /// Whether to materialize upstream response bodies into a
    /// `ReplayableBody`, enabling exact `Content-Length` (§4.2, §6).
    #[serde(default)]
    pub cache_response_body: bool,

    /// Report per-`host:port` stats in addition to the cluster-wide scope
    /// (§6 — "per-host sub-scopes ... when perHostStats is enabled").
    #[serde(default)]
    pub per_host_stats: bool,

    /// Smoothing factor for the cluster's latency EMA (§4.5).
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
}

fn default_retries() -> usize {
    1
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_dead_threshold() -> u32 {
    3
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_ema_alpha() -> f64 {
    0.2
}

/// How a dead supervisor's probe request is built (§4.4's `probeRequest`
/// slot). `LastFailed` is the sentinel `ProberReqLastFail` from
/// `examples/original_source/factories.go`; `None` disables auto-revival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKindConfig {
    None,
    LastFailed,
}

impl Default for ProbeKindConfig {
    fn default() -> Self {
        ProbeKindConfig::LastFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_config_applies_defaults() {
        let toml = r#"
            name = "tco"
            nodes = ["t.co:80"]
        "#;
        let cluster: ClusterConfig = toml::from_str(toml).unwrap();
        assert_eq!(cluster.retries, 1);
        assert_eq!(cluster.timeout, Duration::from_secs(1));
        assert_eq!(cluster.dead_threshold, 3);
        assert_eq!(cluster.probe, ProbeKindConfig::LastFailed);
        assert_eq!(cluster.probe_interval, Duration::from_secs(10));
        assert!(!cluster.cache_response_body);
        assert!(!cluster.per_host_stats);
        assert_eq!(cluster.ema_alpha, 0.2);
    }

    #[test]
    fn cluster_config_parses_humantime_durations() {
        let toml = r#"
            name = "c"
            nodes = ["a:1"]
            timeout = "250ms"
            probe_interval = "30s"
        "#;
        let cluster: ClusterConfig = toml::from_str(toml).unwrap();
        assert_eq!(cluster.timeout, Duration::from_millis(250));
        assert_eq!(cluster.probe_interval, Duration::from_secs(30));
    }

    #[test]
    fn probe_kind_none_disables_revival() {
        let toml = r#"
            name = "c"
            nodes = ["a:1"]
            probe = "none"
        "#;
        let cluster: ClusterConfig = toml::from_str(toml).unwrap();
        assert_eq!(cluster.probe, ProbeKindConfig::None);
    }

    #[test]
    fn rule_set_config_round_trips_via_toml() {
        let toml = r#"
            name = "test"

            [[bindings]]
            listen = ":8888"

            [[bindings.rules]]
            name = "tco"
            source_path_prefix = "/tco/"
            proxied_path_prefix = "/"
            cluster = "tco"

            [bindings.rules.attach_headers]
            True-Client-Ip = "127.0.0.1"
        "#;
        let rule_set: RuleSetConfig = toml::from_str(toml).unwrap();
        assert_eq!(rule_set.name, "test");
        assert_eq!(rule_set.bindings.len(), 1);
        let binding = &rule_set.bindings[0];
        assert_eq!(binding.listen, ":8888");
        assert_eq!(binding.rules.len(), 1);
        assert_eq!(binding.rules[0].cluster.as_deref(), Some("tco"));
        assert_eq!(
            binding.rules[0].attach_headers.get("True-Client-Ip").map(String::as_str),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn gateway_config_defaults_to_empty() {
        let cfg = GatewayConfig::default();
        assert!(cfg.rule_sets.is_empty());
        assert!(cfg.clusters.is_empty());
    }
}
