//! Hub-wide runtime counters
//!
//! Shared by the ingestion path (requests, bytes in), the broadcaster
//! (bytes out) and the status reporter (reads everything).

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Runtime counters (thread-safe)
#[derive(Debug, Default)]
pub struct HubMetrics {
    requests: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    started_at: OnceLock<Instant>,
}

/// Point-in-time view published in `status` envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Time since startup as `HH:MM:SS`
    pub runtime: String,
    /// Full member reports received
    pub hits: u64,
    pub data_in: u64,
    pub data_out: u64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record startup completion; later calls are ignored
    pub fn mark_started(&self) -> bool {
        let first = self.started_at.set(Instant::now()).is_ok();
        debug!(first, "HubMetrics::mark_started: called");
        first
    }

    pub fn is_started(&self) -> bool {
        self.started_at.get().is_some()
    }

    /// Time since `mark_started`, if it has happened
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.get().map(Instant::elapsed)
    }

    /// Count one ingested report of `bytes` length
    pub fn record_request(&self, bytes: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, bytes: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            runtime: format_runtime(self.uptime().unwrap_or_default()),
            hits: self.requests(),
            data_in: self.bytes_in(),
            data_out: self.bytes_out(),
        }
    }
}

/// Zero-padded `HH:MM:SS`; hours keep growing past 99
pub fn format_runtime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
