//! RegistryManager - actor that owns the ClientStateStore
//!
//! Every mutation runs to completion inside the actor, so one upsert plus its
//! eviction pass is never interleaved with another request's.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{MemberRecord, MemberReport};

use super::messages::{RegistryCommand, RegistryError, RegistryResponse, UpsertOutcome};
use super::store::{ClientStateStore, LeaderPolicy};

/// Default command channel depth
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Handle to send commands to the RegistryManager
#[derive(Clone)]
pub struct RegistryManager {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryManager {
    /// Spawn a new RegistryManager actor
    pub fn spawn(stale_after_ms: i64, leader_policy: LeaderPolicy, channel_buffer: usize) -> Self {
        debug!(stale_after_ms, ?leader_policy, channel_buffer, "RegistryManager::spawn: called");
        let store = ClientStateStore::new(stale_after_ms, leader_policy);
        let (tx, rx) = mpsc::channel(channel_buffer.max(1));

        tokio::spawn(actor_loop(store, rx));

        info!("RegistryManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<RegistryResponse<T>>) -> RegistryCommand,
    ) -> RegistryResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelError)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelError)?
    }

    /// Upsert a full report and run the eviction pass
    pub async fn upsert(&self, report: MemberReport, now_ms: i64) -> RegistryResponse<UpsertOutcome> {
        debug!(member_id = %report.id, now_ms, "upsert: called");
        self.request(|reply| RegistryCommand::Upsert { report, now_ms, reply })
            .await
    }

    /// Upsert only if the member is known, then run the eviction pass
    pub async fn update_existing(&self, report: MemberReport, now_ms: i64) -> RegistryResponse<Option<UpsertOutcome>> {
        debug!(member_id = %report.id, now_ms, "update_existing: called");
        self.request(|reply| RegistryCommand::UpdateExisting { report, now_ms, reply })
            .await
    }

    /// Attach a decision to a member; `false` means it was evicted meanwhile
    pub async fn merge_task(&self, id: &str, task: Value) -> RegistryResponse<bool> {
        debug!(%id, "merge_task: called");
        self.request(|reply| RegistryCommand::MergeTask {
            id: id.to_string(),
            task,
            reply,
        })
        .await
    }

    /// Forget a member's decision
    pub async fn clear_task(&self, id: &str) -> RegistryResponse<bool> {
        debug!(%id, "clear_task: called");
        self.request(|reply| RegistryCommand::ClearTask {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Make `id` the sole leader and return the resulting snapshot
    pub async fn set_leader(&self, id: &str) -> RegistryResponse<Vec<MemberRecord>> {
        debug!(%id, "set_leader: called");
        self.request(|reply| RegistryCommand::SetLeader {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Run an eviction pass on its own
    pub async fn evict_stale(&self, now_ms: i64) -> RegistryResponse<Vec<String>> {
        debug!(now_ms, "evict_stale: called");
        self.request(|reply| RegistryCommand::EvictStale { now_ms, reply })
            .await
    }

    /// Every record in registry order
    pub async fn snapshot(&self) -> RegistryResponse<Vec<MemberRecord>> {
        debug!("snapshot: called");
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    /// Stop the actor; pending and later requests fail with `ChannelError`
    pub async fn shutdown(&self) -> RegistryResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(RegistryCommand::Shutdown)
            .await
            .map_err(|_| RegistryError::ChannelError)
    }
}

fn upsert_outcome(store: &mut ClientStateStore, record: MemberRecord, now_ms: i64) -> UpsertOutcome {
    let evicted = store.evict_stale(now_ms);
    UpsertOutcome {
        record,
        evicted,
        snapshot: store.snapshot(),
    }
}

/// The actor loop that owns the store and processes commands
async fn actor_loop(mut store: ClientStateStore, mut rx: mpsc::Receiver<RegistryCommand>) {
    debug!("RegistryManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Upsert { report, now_ms, reply } => {
                debug!(member_id = %report.id, "actor_loop: Upsert command");
                let record = store.upsert(report, now_ms).clone();
                let _ = reply.send(Ok(upsert_outcome(&mut store, record, now_ms)));
            }

            RegistryCommand::UpdateExisting { report, now_ms, reply } => {
                debug!(member_id = %report.id, "actor_loop: UpdateExisting command");
                let outcome = store
                    .update_existing(report, now_ms)
                    .cloned()
                    .map(|record| upsert_outcome(&mut store, record, now_ms));
                let _ = reply.send(Ok(outcome));
            }

            RegistryCommand::MergeTask { id, task, reply } => {
                debug!(%id, "actor_loop: MergeTask command");
                let _ = reply.send(Ok(store.merge_task(&id, task)));
            }

            RegistryCommand::ClearTask { id, reply } => {
                debug!(%id, "actor_loop: ClearTask command");
                let _ = reply.send(Ok(store.clear_task(&id)));
            }

            RegistryCommand::SetLeader { id, reply } => {
                debug!(%id, "actor_loop: SetLeader command");
                let result = if store.set_leader(&id) {
                    Ok(store.snapshot())
                } else {
                    Err(RegistryError::NotFound(id))
                };
                let _ = reply.send(result);
            }

            RegistryCommand::EvictStale { now_ms, reply } => {
                debug!(now_ms, "actor_loop: EvictStale command");
                let _ = reply.send(Ok(store.evict_stale(now_ms)));
            }

            RegistryCommand::Snapshot { reply } => {
                debug!("actor_loop: Snapshot command");
                let _ = reply.send(Ok(store.snapshot()));
            }

            RegistryCommand::Shutdown => {
                info!(members = store.len(), "RegistryManager shutting down");
                break;
            }
        }
    }

    debug!("RegistryManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Location;
    use crate::registry::DEFAULT_STALE_AFTER_MS;
    use serde_json::json;

    fn spawn() -> RegistryManager {
        RegistryManager::spawn(DEFAULT_STALE_AFTER_MS, LeaderPolicy::Exclusive, 16)
    }

    fn report(id: &str) -> MemberReport {
        MemberReport::new(id, Location::new(1.0, 2.0, 0.0))
    }

    #[tokio::test]
    async fn test_upsert_returns_snapshot() {
        let manager = spawn();

        manager.upsert(report("m1"), 0).await.unwrap();
        let outcome = manager.upsert(report("m2"), 10).await.unwrap();

        assert_eq!(outcome.record.id, "m2");
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.snapshot.len(), 2);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_evicts_stale_members() {
        let manager = spawn();

        manager.upsert(report("m3"), 0).await.unwrap();
        let outcome = manager.upsert(report("m4"), 6_000).await.unwrap();

        assert_eq!(outcome.evicted, vec!["m3".to_string()]);
        let ids: Vec<_> = outcome.snapshot.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m4"]);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_existing_unknown_member() {
        let manager = spawn();

        let outcome = manager.update_existing(report("ghost"), 0).await.unwrap();
        assert!(outcome.is_none());
        assert!(manager.snapshot().await.unwrap().is_empty());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_task_and_partial_update() {
        let manager = spawn();

        manager.upsert(report("m1"), 0).await.unwrap();
        assert!(manager.merge_task("m1", json!({"action": "hold"})).await.unwrap());

        let outcome = manager.update_existing(report("m1"), 100).await.unwrap().unwrap();
        assert_eq!(outcome.record.task, Some(json!({"action": "hold"})));

        assert!(manager.clear_task("m1").await.unwrap());
        let snapshot = manager.snapshot().await.unwrap();
        assert!(snapshot[0].task.is_none());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_merge_task_for_evicted_member() {
        let manager = spawn();

        manager.upsert(report("m1"), 0).await.unwrap();
        let evicted = manager.evict_stale(60_000).await.unwrap();
        assert_eq!(evicted, vec!["m1".to_string()]);

        assert!(!manager.merge_task("m1", json!("late")).await.unwrap());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_leader() {
        let manager = spawn();

        manager.upsert(report("m1").with_leader(true), 0).await.unwrap();
        manager.upsert(report("m2"), 0).await.unwrap();

        let snapshot = manager.set_leader("m2").await.unwrap();
        assert!(!snapshot[0].is_leader);
        assert!(snapshot[1].is_leader);

        let missing = manager.set_leader("ghost").await;
        assert!(matches!(missing, Err(RegistryError::NotFound(id)) if id == "ghost"));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let manager = spawn();
        manager.shutdown().await.unwrap();

        // Give the actor a moment to exit
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let result = manager.snapshot().await;
        assert!(matches!(result, Err(RegistryError::ChannelError)));
    }
}
