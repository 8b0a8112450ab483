//! StatusReporter - periodic heartbeat to observers
//!
//! Publishes a `status` envelope every interval once the hub has marked
//! itself started. Identical snapshots within a second are collapsed by the
//! broadcaster.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::broadcast::{Broadcaster, PublishOutcome};
use crate::domain::{Envelope, EnvelopeKind};
use crate::hub::shutdown_requested;

use super::metrics::HubMetrics;

/// Default heartbeat period
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

pub struct StatusReporter {
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<HubMetrics>,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(broadcaster: Arc<Broadcaster>, metrics: Arc<HubMetrics>, interval: Duration) -> Self {
        Self {
            broadcaster,
            metrics,
            interval,
        }
    }

    /// Publish one status envelope; `None` before startup completes
    pub fn tick(&self) -> Option<PublishOutcome> {
        if !self.metrics.is_started() {
            return None;
        }
        let envelope = Envelope::of(EnvelopeKind::Status, &self.metrics.snapshot());
        Some(self.broadcaster.publish(&envelope))
    }

    /// Tick until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "StatusReporter starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(outcome) = self.tick() {
                        debug!(?outcome, "StatusReporter: tick");
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    info!("StatusReporter stopping");
                    break;
                }
            }
        }
    }
}
