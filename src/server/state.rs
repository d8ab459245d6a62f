//! Shared, immutable-after-startup gateway state (§5 — "Binding table and
//! rule lists: immutable after startup").
//!
//! Grounded on the teacher's `server/state.rs` root-aggregate shape, with
//! the etcd/consul/instance-registry sub-states dropped: this crate has no
//! control plane, so the only shared state a request handler needs is the
//! metrics handle and the binding table built once in `bootstrap::run`.

use crate::metrics::Metrics;
use crate::rule::Rule;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared gateway state, cheaply cloneable. Built once in `bootstrap::run`
/// and never mutated afterward — no `ArcSwap`, no reload path.
#[derive(Clone)]
pub struct GatewayState {
    pub metrics: Metrics,
    /// Listener address → ordered rule list, as produced by
    /// `RuleRegistry::get`.
    pub bindings: Arc<HashMap<String, Vec<Arc<Rule>>>>,
}

impl GatewayState {
    pub fn new(metrics: Metrics, bindings: HashMap<String, Vec<Arc<Rule>>>) -> Self {
        Self { metrics, bindings: Arc::new(bindings) }
    }

    pub fn rules_for(&self, listen: &str) -> &[Arc<Rule>] {
        self.bindings.get(listen).map(Vec::as_slice).unwrap_or(&[])
    }
}
