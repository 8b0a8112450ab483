//! Registry manager messages
//!
//! Commands and responses for the actor pattern.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{MemberRecord, MemberReport};

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Member not found: {0}")]
    NotFound(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from registry operations
pub type RegistryResponse<T> = Result<T, RegistryError>;

/// Result of one upsert + eviction pass, taken atomically
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The record as stored after the upsert
    pub record: MemberRecord,
    /// Ids removed by the eviction pass that followed
    pub evicted: Vec<String>,
    /// Registry contents after both steps
    pub snapshot: Vec<MemberRecord>,
}

/// Commands sent to the RegistryManager actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Full report: insert or replace, then evict
    Upsert {
        report: MemberReport,
        now_ms: i64,
        reply: oneshot::Sender<RegistryResponse<UpsertOutcome>>,
    },
    /// Partial update: only known members, then evict
    UpdateExisting {
        report: MemberReport,
        now_ms: i64,
        reply: oneshot::Sender<RegistryResponse<Option<UpsertOutcome>>>,
    },
    MergeTask {
        id: String,
        task: Value,
        reply: oneshot::Sender<RegistryResponse<bool>>,
    },
    ClearTask {
        id: String,
        reply: oneshot::Sender<RegistryResponse<bool>>,
    },
    SetLeader {
        id: String,
        reply: oneshot::Sender<RegistryResponse<Vec<MemberRecord>>>,
    },
    EvictStale {
        now_ms: i64,
        reply: oneshot::Sender<RegistryResponse<Vec<String>>>,
    },
    Snapshot {
        reply: oneshot::Sender<RegistryResponse<Vec<MemberRecord>>>,
    },

    // Shutdown
    Shutdown,
}
