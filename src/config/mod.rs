pub mod types;

pub use types::*;

use crate::error::GatewayError;
use std::collections::HashSet;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a TOML file. Falls back to the empty default
    /// (no rule sets, no clusters) when the file does not exist, matching
    /// the teacher's zero-config startup convenience.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| GatewayError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| GatewayError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::info!(
                "config: file not found at {}, starting with no rule sets",
                path.display()
            );
            GatewayConfig::default()
        };

        config.validate()?;
        tracing::info!(
            "config: loaded, rule_sets={}, clusters={}",
            config.rule_sets.len(),
            config.clusters.len()
        );
        Ok(config)
    }

    /// Structural checks beyond what serde's `#[serde(default)]` already
    /// guarantees: rule-set names are unique (the registry would reject a
    /// duplicate anyway, but failing fast at load time gives a clearer
    /// error), every rule's `cluster` reference resolves, and every cluster
    /// has at least one node.
    fn validate(&self) -> Result<(), GatewayError> {
        let mut seen_rule_sets = HashSet::new();
        for rule_set in &self.rule_sets {
            if !seen_rule_sets.insert(rule_set.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate rule_sets.name: {}",
                    rule_set.name
                )));
            }
        }

        let cluster_names: HashSet<&str> =
            self.clusters.iter().map(|c| c.name.as_str()).collect();

        for cluster in &self.clusters {
            if cluster.nodes.is_empty() {
                return Err(GatewayError::Config(format!(
                    "cluster '{}' has no nodes",
                    cluster.name
                )));
            }
        }

        for rule_set in &self.rule_sets {
            for binding in &rule_set.bindings {
                for rule in &binding.rules {
                    if let Some(cluster) = &rule.cluster {
                        if !cluster_names.contains(cluster.as_str()) {
                            return Err(GatewayError::Config(format!(
                                "rule '{}' in rule_set '{}' references unknown cluster '{}'",
                                rule.name, rule_set.name, cluster
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_yields_empty_default() {
        let cfg = GatewayConfig::load(Path::new("/nonexistent/gateway.toml")).unwrap();
        assert!(cfg.rule_sets.is_empty());
        assert!(cfg.clusters.is_empty());
    }

    #[test]
    fn validate_rejects_unknown_cluster_reference() {
        let toml = r#"
            [[rule_sets]]
            name = "test"

            [[rule_sets.bindings]]
            listen = ":8888"

            [[rule_sets.bindings.rules]]
            name = "tco"
            source_path_prefix = "/tco/"
            proxied_path_prefix = "/"
            cluster = "missing"
        "#;
        let cfg: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_rule_set_names() {
        let toml = r#"
            [[rule_sets]]
            name = "dup"
            [[rule_sets]]
            name = "dup"
        "#;
        let cfg: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_cluster_without_nodes() {
        let toml = r#"
            [[clusters]]
            name = "empty"
            nodes = []
        "#;
        let cfg: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        let toml = r#"
            [[clusters]]
            name = "tco"
            nodes = ["t.co:80"]

            [[rule_sets]]
            name = "test"

            [[rule_sets.bindings]]
            listen = ":8888"

            [[rule_sets.bindings.rules]]
            name = "tco"
            source_path_prefix = "/tco/"
            proxied_path_prefix = "/"
            cluster = "tco"
        "#;
        let cfg: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
