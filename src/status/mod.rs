//! Runtime counters and the periodic status heartbeat

mod metrics;
mod reporter;

pub use metrics::{HubMetrics, StatusSnapshot, format_runtime};
pub use reporter::{DEFAULT_STATUS_INTERVAL_MS, StatusReporter};
