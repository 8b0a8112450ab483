//! ClientStateStore - member id to latest known state
//!
//! Synchronous and clock-injected: every time-dependent call takes `now_ms`.
//! The [`RegistryManager`](super::RegistryManager) actor owns the only live
//! instance, so no locking happens here.

use indexmap::IndexMap;
use indexmap::map::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{MemberRecord, MemberReport};

/// Records older than this are evicted
pub const DEFAULT_STALE_AFTER_MS: i64 = 5_000;

/// How `isLeader` flags from reports are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderPolicy {
    /// A report claiming leadership clears every other leader flag
    #[default]
    Exclusive,
    /// Flags are stored exactly as reported
    Permissive,
}

/// Member registry in insertion order
#[derive(Debug)]
pub struct ClientStateStore {
    members: IndexMap<String, MemberRecord>,
    stale_after_ms: i64,
    leader_policy: LeaderPolicy,
}

impl Default for ClientStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER_MS, LeaderPolicy::default())
    }
}

impl ClientStateStore {
    pub fn new(stale_after_ms: i64, leader_policy: LeaderPolicy) -> Self {
        debug!(stale_after_ms, ?leader_policy, "ClientStateStore::new: called");
        Self {
            members: IndexMap::new(),
            stale_after_ms,
            leader_policy,
        }
    }

    pub fn stale_after_ms(&self) -> i64 {
        self.stale_after_ms
    }

    /// Insert a new record or replace an existing one, carrying `task` over
    pub fn upsert(&mut self, report: MemberReport, now_ms: i64) -> &MemberRecord {
        debug!(member_id = %report.id, now_ms, "ClientStateStore::upsert: called");
        if report.is_leader && self.leader_policy == LeaderPolicy::Exclusive {
            self.clear_leaders_except(&report.id);
        }

        match self.members.entry(report.id.clone()) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                record.apply_report(report, now_ms);
                record
            }
            Entry::Vacant(entry) => {
                debug!(member_id = %entry.key(), "ClientStateStore::upsert: new member");
                entry.insert(MemberRecord::from_report(report, now_ms))
            }
        }
    }

    /// Upsert only when the member is already known
    pub fn update_existing(&mut self, report: MemberReport, now_ms: i64) -> Option<&MemberRecord> {
        if !self.members.contains_key(&report.id) {
            debug!(member_id = %report.id, "ClientStateStore::update_existing: unknown member, ignoring");
            return None;
        }
        Some(self.upsert(report, now_ms))
    }

    /// Set the task on a live record; returns false if the member is gone
    pub fn merge_task(&mut self, id: &str, task: Value) -> bool {
        match self.members.get_mut(id) {
            Some(record) => {
                record.task = Some(task);
                true
            }
            None => {
                debug!(member_id = %id, "ClientStateStore::merge_task: member evicted, dropping task");
                false
            }
        }
    }

    /// Explicitly forget a member's task
    pub fn clear_task(&mut self, id: &str) -> bool {
        match self.members.get_mut(id) {
            Some(record) => record.task.take().is_some(),
            None => false,
        }
    }

    /// Make `id` the only leader; returns false if the member is unknown
    pub fn set_leader(&mut self, id: &str) -> bool {
        if !self.members.contains_key(id) {
            return false;
        }
        self.clear_leaders_except(id);
        if let Some(record) = self.members.get_mut(id) {
            record.is_leader = true;
        }
        true
    }

    fn clear_leaders_except(&mut self, leader_id: &str) {
        for (id, record) in self.members.iter_mut() {
            if id != leader_id && record.is_leader {
                debug!(member_id = %id, new_leader = %leader_id, "ClientStateStore: clearing previous leader");
                record.is_leader = false;
            }
        }
    }

    /// Drop every record whose age exceeds the threshold; returns evicted ids
    pub fn evict_stale(&mut self, now_ms: i64) -> Vec<String> {
        let threshold = self.stale_after_ms;
        let mut evicted = Vec::new();
        self.members.retain(|id, record| {
            let keep = !record.is_stale(now_ms, threshold);
            if !keep {
                evicted.push(id.clone());
            }
            keep
        });
        if !evicted.is_empty() {
            debug!(?evicted, now_ms, "ClientStateStore::evict_stale: evicted members");
        }
        evicted
    }

    /// Copy of every record in registry order
    pub fn snapshot(&self) -> Vec<MemberRecord> {
        self.members.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&MemberRecord> {
        self.members.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Point2};
    use proptest::prelude::*;
    use serde_json::json;

    fn report(id: &str) -> MemberReport {
        MemberReport::new(id, Location::new(1.0, 2.0, 0.0))
    }

    #[test]
    fn test_first_upsert_has_no_task() {
        let mut store = ClientStateStore::default();
        let record = store.upsert(report("m1"), 0);

        assert_eq!(record.id, "m1");
        assert!(record.task.is_none());
        assert_eq!(record.last_seen, 0);
    }

    #[test]
    fn test_upsert_preserves_task() {
        let mut store = ClientStateStore::default();
        store.upsert(report("m1"), 0);
        assert!(store.merge_task("m1", json!({"action": "hold"})));

        let moved = MemberReport::new("m1", Location::new(9.0, 9.0, 9.0));
        let record = store.upsert(moved, 100);

        assert_eq!(record.location, Location::new(9.0, 9.0, 9.0));
        assert_eq!(record.task, Some(json!({"action": "hold"})));
        assert_eq!(record.last_seen, 100);
    }

    #[test]
    fn test_update_existing_ignores_unknown() {
        let mut store = ClientStateStore::default();
        assert!(store.update_existing(report("ghost"), 0).is_none());
        assert!(store.is_empty());

        store.upsert(report("m1"), 0);
        assert!(store.update_existing(report("m1"), 10).is_some());
        assert_eq!(store.get("m1").unwrap().last_seen, 10);
    }

    #[test]
    fn test_evict_after_threshold() {
        let mut store = ClientStateStore::default();
        store.upsert(report("m3"), 0);

        assert!(store.evict_stale(5_000).is_empty());
        assert!(store.contains("m3"));

        assert_eq!(store.evict_stale(6_000), vec!["m3".to_string()]);
        assert!(store.snapshot().iter().all(|r| r.id != "m3"));
    }

    #[test]
    fn test_evict_only_stale_members() {
        let mut store = ClientStateStore::default();
        store.upsert(report("old"), 0);
        store.upsert(report("fresh"), 4_000);

        let evicted = store.evict_stale(7_000);
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(store.contains("fresh"));
    }

    #[test]
    fn test_merge_task_after_eviction_is_noop() {
        let mut store = ClientStateStore::default();
        store.upsert(report("m1"), 0);
        store.evict_stale(10_000);

        assert!(!store.merge_task("m1", json!({"action": "late"})));
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_task() {
        let mut store = ClientStateStore::default();
        store.upsert(report("m1"), 0);
        store.merge_task("m1", json!("attack"));

        assert!(store.clear_task("m1"));
        assert!(store.get("m1").unwrap().task.is_none());
        assert!(!store.clear_task("m1"));
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let mut store = ClientStateStore::default();
        store.upsert(report("b"), 0);
        store.upsert(report("a"), 1);
        store.upsert(report("c"), 2);
        store.upsert(report("b"), 3);

        let ids: Vec<_> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_exclusive_leader_policy() {
        let mut store = ClientStateStore::new(DEFAULT_STALE_AFTER_MS, LeaderPolicy::Exclusive);
        store.upsert(report("m1").with_leader(true), 0);
        store.upsert(report("m2").with_leader(true), 1);

        assert!(!store.get("m1").unwrap().is_leader);
        assert!(store.get("m2").unwrap().is_leader);
    }

    #[test]
    fn test_permissive_leader_policy() {
        let mut store = ClientStateStore::new(DEFAULT_STALE_AFTER_MS, LeaderPolicy::Permissive);
        store.upsert(report("m1").with_leader(true), 0);
        store.upsert(report("m2").with_leader(true), 1);

        assert!(store.get("m1").unwrap().is_leader);
        assert!(store.get("m2").unwrap().is_leader);
    }

    #[test]
    fn test_set_leader_is_exclusive_under_any_policy() {
        let mut store = ClientStateStore::new(DEFAULT_STALE_AFTER_MS, LeaderPolicy::Permissive);
        store.upsert(report("m1").with_leader(true), 0);
        store.upsert(report("m2"), 0);

        assert!(store.set_leader("m2"));
        assert!(!store.get("m1").unwrap().is_leader);
        assert!(store.get("m2").unwrap().is_leader);

        assert!(!store.set_leader("ghost"));
        assert!(store.get("m2").unwrap().is_leader);
    }

    #[test]
    fn test_mobiles_replaced_on_update() {
        let mut store = ClientStateStore::default();
        store.upsert(report("m1").with_mobile("t1", Point2::new(1.0, 1.0)), 0);
        store.upsert(report("m1").with_mobile("t2", Point2::new(2.0, 2.0)), 1);

        let record = store.get("m1").unwrap();
        assert_eq!(record.mobiles.len(), 1);
        assert!(record.mobiles.contains_key("t2"));
    }

    proptest! {
        #[test]
        fn prop_upserts_never_touch_task(
            coords in proptest::collection::vec((-100.0f64..100.0, -100.0f64..100.0, any::<bool>()), 1..40)
        ) {
            let mut store = ClientStateStore::default();
            store.upsert(report("m1"), 0);
            store.merge_task("m1", json!({"action": "hold"}));

            for (i, (x, y, leader)) in coords.into_iter().enumerate() {
                let update = MemberReport::new("m1", Location::new(x, y, 0.0)).with_leader(leader);
                store.upsert(update, i as i64);
                prop_assert_eq!(&store.get("m1").unwrap().task, &Some(json!({"action": "hold"})));
            }
        }

        #[test]
        fn prop_absent_iff_stale(
            seen in proptest::collection::vec(0i64..20_000, 1..20),
            now in 0i64..25_000
        ) {
            let mut store = ClientStateStore::default();
            for (i, last_seen) in seen.iter().enumerate() {
                store.upsert(report(&format!("m{i}")), *last_seen);
            }
            store.evict_stale(now);

            for (i, last_seen) in seen.iter().enumerate() {
                let present = store.contains(&format!("m{i}"));
                prop_assert_eq!(present, now - last_seen <= DEFAULT_STALE_AFTER_MS);
            }
        }
    }
}
