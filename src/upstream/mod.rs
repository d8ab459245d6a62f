pub mod cluster;
pub mod supervisor;
pub mod timeout;
pub mod transport;

pub use cluster::{Cluster, ClusterStore};
pub use supervisor::{LatencyEma, ProbeSpec, Supervisor};
pub use transport::{TransportError, UpstreamBody, UpstreamTransport};

/// Bit-packs an `f64` for storage in an `AtomicU64`, used by [`LatencyEma`]
/// to keep the moving average lock-free.
pub(crate) fn f64_to_bits(value: f64) -> u64 {
    value.to_bits()
}

pub(crate) fn bits_to_f64(bits: u64) -> f64 {
    f64::from_bits(bits)
}
