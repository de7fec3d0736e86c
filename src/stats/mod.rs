//! Runtime statistics

mod metrics;

pub(crate) use metrics::BridgeCounters;
pub use metrics::{BridgeStats, RegistryStats, ServiceStats, StreamSummary};
