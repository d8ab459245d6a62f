//! Name → rule-set constructor mapping, assembled at startup into the
//! binding table (§4.9).
//!
//! Grounded on `examples/original_source/conf.go`'s `AddRules`/`GetRules`:
//! a process-wide map from name to a no-argument constructor, `get` merging
//! several named constructors' bindings by concatenation (no dedup — the
//! Go original's own `//TODO: duplication detection`, carried over as an
//! explicit non-requirement rather than silently fixed), applying a port
//! offset, and logging unknown names without failing the process.

use crate::rule::Rule;
use std::collections::HashMap;
use std::sync::Arc;

/// One listener's rule list, in match order.
pub type RuleSet = Vec<Arc<Rule>>;

/// Listener address → rule set, the shape `get()` produces.
pub type BindingToRules = HashMap<String, RuleSet>;

type RuleSetCtor = Box<dyn Fn() -> BindingToRules + Send + Sync>;

/// Builder half of the registry: only `add` is available, so "no mutation
/// after init" is enforced by the type rather than by convention. Call
/// [`RuleRegistryBuilder::freeze`] once all named rule sets are registered.
#[derive(Default)]
pub struct RuleRegistryBuilder {
    ctors: HashMap<String, RuleSetCtor>,
}

impl RuleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with its constructor. Returns `false` (and leaves
    /// the existing entry untouched) if `name` is already registered,
    /// mirroring the Go original's boolean-return `AddRules`.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> BindingToRules + Send + Sync + 'static,
    ) -> bool {
        let name = name.into();
        if self.ctors.contains_key(&name) {
            return false;
        }
        self.ctors.insert(name, Box::new(ctor));
        true
    }

    pub fn freeze(self) -> RuleRegistry {
        RuleRegistry { ctors: self.ctors }
    }
}

/// Read-only registry, built once at startup.
pub struct RuleRegistry {
    ctors: HashMap<String, RuleSetCtor>,
}

impl RuleRegistry {
    /// Resolves `names` (comma-separated, whitespace trimmed) against the
    /// registry, merges their bindings, and shifts every port by
    /// `port_offset`. Unknown names are logged and skipped — not fatal,
    /// per §6's "unknown rule name is logged, not fatal".
    pub fn get(&self, names: &str, port_offset: i32) -> BindingToRules {
        let mut result: BindingToRules = HashMap::new();

        for raw_name in names.split(',') {
            let name = raw_name.trim();
            if name.is_empty() {
                continue;
            }
            match self.ctors.get(name) {
                Some(ctor) => {
                    let bindings = ctor();
                    for (listen, rules) in bindings {
                        let shifted = apply_port_offset(&listen, port_offset);
                        result.entry(shifted).or_default().extend(rules);
                    }
                }
                None => {
                    tracing::warn!(rule_set = name, "unknown rule set name");
                }
            }
        }

        for (listen, rules) in &result {
            let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
            tracing::info!(
                listen,
                count = rules.len(),
                rules = %names.join(", "),
                "serving rules"
            );
        }

        result
    }
}

/// Shifts the numeric port component of a `host:port` (or bare `:port`)
/// listener address by `offset`. Returns `listen` unchanged if it has no
/// parseable port.
fn apply_port_offset(listen: &str, offset: i32) -> String {
    if offset == 0 {
        return listen.to_string();
    }
    let Some(colon) = listen.rfind(':') else {
        return listen.to_string();
    };
    let (host, port_str) = listen.split_at(colon);
    let port_str = &port_str[1..];
    let Ok(port) = port_str.parse::<i32>() else {
        return listen.to_string();
    };
    let new_port = port + offset;
    format!("{host}:{new_port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_set(listen: &str, rule_names: &[&str]) -> BindingToRules {
        let mut map = BindingToRules::new();
        map.insert(
            listen.to_string(),
            rule_names
                .iter()
                .map(|n| {
                    Arc::new(Rule::PrefixRewrite(crate::rule::PrefixRewriteRule::new(
                        *n,
                        "",
                        "/",
                        "/",
                        HashMap::new(),
                        None,
                        None,
                    )))
                })
                .collect(),
        );
        map
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let mut builder = RuleRegistryBuilder::new();
        assert!(builder.add("test", || rule_set(":8888", &["a"])));
        assert!(!builder.add("test", || rule_set(":8888", &["b"])));
    }

    #[test]
    fn get_merges_bindings_across_named_sets_without_dedup() {
        let mut builder = RuleRegistryBuilder::new();
        builder.add("a", || rule_set(":8888", &["one"]));
        builder.add("b", || rule_set(":8888", &["one"]));
        let registry = builder.freeze();

        let bindings = registry.get("a,b", 0);
        assert_eq!(bindings[":8888"].len(), 2);
    }

    #[test]
    fn get_applies_port_offset() {
        let mut builder = RuleRegistryBuilder::new();
        builder.add("a", || rule_set(":8888", &["one"]));
        let registry = builder.freeze();

        let bindings = registry.get("a", 10);
        assert!(bindings.contains_key(":8898"));
    }

    #[test]
    fn get_logs_and_skips_unknown_names_without_failing() {
        let registry = RuleRegistryBuilder::new().freeze();
        let bindings = registry.get("nonexistent", 0);
        assert!(bindings.is_empty());
    }

    #[test]
    fn empty_builtin_rule_set_yields_no_bindings() {
        let mut builder = RuleRegistryBuilder::new();
        builder.add("empty", BindingToRules::new);
        let registry = builder.freeze();
        assert!(registry.get("empty", 0).is_empty());
    }
}
