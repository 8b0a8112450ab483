//! OptionsRegistry - the single shared SimulationOptions value

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use crate::broadcast::Broadcaster;
use crate::domain::{Envelope, EnvelopeKind, SimulationOptions};

/// Holds the last validated options and announces every change
pub struct OptionsRegistry {
    current: RwLock<SimulationOptions>,
    broadcaster: Arc<Broadcaster>,
}

impl OptionsRegistry {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self::with_initial(SimulationOptions::default(), broadcaster)
    }

    pub fn with_initial(initial: SimulationOptions, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            current: RwLock::new(initial),
            broadcaster,
        }
    }

    /// Current options; always a valid value
    pub fn get(&self) -> SimulationOptions {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Coerce `raw`, store it, then publish the options and a log line
    ///
    /// Never fails. The write guard is held until both envelopes are out, so
    /// concurrent updates reach observers in the order they were stored.
    pub fn set(&self, raw: &Value) -> SimulationOptions {
        debug!(%raw, "OptionsRegistry::set: called");
        let options = SimulationOptions::coerce(raw);
        let summary = serde_json::to_string(&options).unwrap_or_default();

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = options.clone();
        self.broadcaster.publish(&Envelope::of(EnvelopeKind::Options, &options));
        self.broadcaster
            .publish(&Envelope::log(format!("Updated simulation options: {summary}")));
        drop(current);

        info!(options = %summary, "Simulation options updated");
        options
    }

    /// Envelope for a joining observer's burst
    pub fn envelope(&self) -> Envelope {
        Envelope::of(EnvelopeKind::Options, &self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AttackStyle, MAX_DISTANCE_FROM_LEADER};
    use crate::status::HubMetrics;
    use serde_json::json;
    use std::sync::Barrier;

    fn registry() -> (OptionsRegistry, Arc<Broadcaster>) {
        let broadcaster = Arc::new(Broadcaster::with_defaults(Arc::new(HubMetrics::new())));
        (OptionsRegistry::new(broadcaster.clone()), broadcaster)
    }

    #[test]
    fn test_defaults() {
        let (registry, _) = registry();
        assert_eq!(registry.get(), SimulationOptions::default());
    }

    #[test]
    fn test_set_clamps_and_coerces() {
        let (registry, _) = registry();

        let stored = registry.set(&json!({
            "maxDistanceFromLeader": 999,
            "followLeader": true,
            "attackStyle": "bogus"
        }));

        assert_eq!(stored.max_distance_from_leader, MAX_DISTANCE_FROM_LEADER);
        assert_eq!(stored.attack_style, AttackStyle::Focused);
        assert!(stored.follow_leader);
        assert_eq!(registry.get(), stored);
    }

    #[tokio::test]
    async fn test_set_publishes_options_then_log() {
        let (registry, broadcaster) = registry();
        let mut observer = broadcaster.subscribe();

        registry.set(&json!({"maxDistanceFromLeader": 5, "attackStyle": "AoE"}));

        let first: Value = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "options");
        assert_eq!(first["data"]["maxDistanceFromLeader"], 5);
        assert_eq!(first["data"]["attackStyle"], "AoE");

        let second: Value = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(second["type"], "log");
        assert!(second["data"].as_str().unwrap().starts_with("Updated simulation options: "));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sets_publish_in_store_order() {
        for round in 0..200 {
            let (registry, broadcaster) = registry();
            let registry = Arc::new(registry);
            let mut observer = broadcaster.subscribe();
            let barrier = Arc::new(Barrier::new(2));

            let writers: Vec<_> = [3, 7]
                .into_iter()
                .map(|distance| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.set(&json!({"maxDistanceFromLeader": distance}));
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            // Two options envelopes and two log lines, all distinct
            let mut last_published = None;
            for _ in 0..4 {
                let got: Value = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
                if got["type"] == "options" {
                    last_published = Some(got["data"]["maxDistanceFromLeader"].as_u64().unwrap());
                }
            }

            let stored = u64::from(registry.get().max_distance_from_leader);
            assert_eq!(last_published, Some(stored), "round {round}");
        }
    }

    #[test]
    fn test_non_object_body_yields_defaults_for_missing_fields() {
        let (registry, _) = registry();
        let stored = registry.set(&json!("nonsense"));

        assert_eq!(stored.max_distance_from_leader, 2);
        assert!(!stored.follow_leader);
        assert_eq!(stored.attack_style, AttackStyle::Focused);
    }
}
