//! Hub - composition root for the coordination core
//!
//! Owns the registry actor, broadcaster, options, decision bridge and
//! counters, and implements every operation the transport layer exposes.
//! Cheap to clone; all clones share the same state.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::{DecisionBridge, ENGINE_FAILURE_MESSAGE, PolicyEngine, ProcessPolicyEngine};
use crate::broadcast::{Broadcaster, ObserverHandle};
use crate::config::Config;
use crate::domain::{Envelope, EnvelopeKind, MemberRecord, MemberReport, SimulationOptions};
use crate::options::OptionsRegistry;
use crate::registry::{RegistryError, RegistryManager, grid_cells, member_summaries};
use crate::status::{HubMetrics, StatusReporter};

/// Errors surfaced by hub operations
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

/// Message sent by an observer over the push channel
#[derive(Debug, Deserialize)]
struct ObserverMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Resolve once `rx` reads true; never resolves if the sender is gone first
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Clone)]
pub struct Hub {
    registry: RegistryManager,
    broadcaster: Arc<Broadcaster>,
    options: Arc<OptionsRegistry>,
    bridge: DecisionBridge,
    metrics: Arc<HubMetrics>,
    scenarios: Arc<Vec<String>>,
    status_interval: Duration,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Hub {
    /// Build a hub around `engine`; must be called inside a tokio runtime
    pub fn new(config: &Config, engine: Arc<dyn PolicyEngine>) -> Self {
        debug!(engine = engine.name(), "Hub::new: called");
        let metrics = Arc::new(HubMetrics::new());
        let broadcaster = Arc::new(Broadcaster::new(
            config.broadcast.channel_capacity,
            config.broadcast.dedup_capacity,
            metrics.clone(),
        ));
        let registry = RegistryManager::spawn(
            config.registry.stale_after_ms,
            config.registry.leader_policy,
            config.registry.channel_buffer,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bridge = DecisionBridge::new(
            engine,
            &config.policy,
            registry.clone(),
            broadcaster.clone(),
            shutdown_rx,
        );

        Self {
            registry,
            options: Arc::new(OptionsRegistry::new(broadcaster.clone())),
            broadcaster,
            bridge,
            metrics,
            scenarios: Arc::new(config.scenarios.clone()),
            status_interval: config.status.interval(),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Build a hub that runs the configured external policy program
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(ProcessPolicyEngine::from_config(&config.policy)))
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn registry(&self) -> &RegistryManager {
        &self.registry
    }

    pub fn bridge(&self) -> &DecisionBridge {
        &self.bridge
    }

    pub fn options(&self) -> SimulationOptions {
        self.options.get()
    }

    /// Full report: upsert, evict, announce, then wait for the policy decision
    ///
    /// Returns the task, or the engine-failure body. Engine failure is not an
    /// `Err`: the member gets an explicit error payload.
    pub async fn ingest_report(&self, report: MemberReport, body_len: usize) -> Result<Value, HubError> {
        debug!(member_id = %report.id, body_len, "Hub::ingest_report: called");
        self.metrics.record_request(body_len as u64);

        let member_id = report.id.clone();
        let received = report.brief();
        let outcome = self.registry.upsert(report, now_ms()).await?;
        if !outcome.evicted.is_empty() {
            info!(evicted = ?outcome.evicted, "Evicted stale members");
        }

        let clients: Vec<Value> = outcome.snapshot.iter().map(MemberRecord::brief).collect();
        self.broadcaster
            .publish(&Envelope::log(format!("Current clients: {}", Value::Array(clients))));
        self.publish_roster(&outcome.snapshot);
        self.broadcaster
            .publish(&Envelope::log(format!("Received data from {member_id}: {received}")));

        let options = self.options.get();
        match self.bridge.decide(&member_id, &outcome.snapshot, &options).await {
            Ok(task) => Ok(task),
            Err(e) => {
                debug!(%member_id, error = %e, "Hub::ingest_report: answering with failure body");
                Ok(json!({ "error": ENGINE_FAILURE_MESSAGE }))
            }
        }
    }

    /// Partial update with no decision cycle; `false` if the member is unknown
    pub async fn update_member(&self, report: MemberReport) -> Result<bool, HubError> {
        debug!(member_id = %report.id, "Hub::update_member: called");
        let member_id = report.id.clone();
        let updated = report.brief();

        let Some(outcome) = self.registry.update_existing(report, now_ms()).await? else {
            debug!(%member_id, "Hub::update_member: unknown member, ignored");
            return Ok(false);
        };

        self.broadcaster
            .publish(&Envelope::log(format!("Updated client {member_id} in server: {updated}")));
        self.publish_roster(&outcome.snapshot);
        Ok(true)
    }

    /// Replace the simulation options from an arbitrary JSON body
    pub fn update_options(&self, raw: &Value) -> SimulationOptions {
        self.options.set(raw)
    }

    /// Register a new observer and queue its full-state burst
    pub async fn observer_joined(&self) -> Result<ObserverHandle, HubError> {
        let mut observer = self.broadcaster.subscribe();
        let snapshot = self.registry.snapshot().await?;
        observer.queue_direct(&[
            Envelope::of(EnvelopeKind::Members, &member_summaries(&snapshot)),
            Envelope::of(EnvelopeKind::Scenarios, &*self.scenarios),
            self.options.envelope(),
        ]);
        // Subscribed already, so the newcomer sees its own announcement after the burst
        self.broadcaster.publish(&Envelope::log("WebSocket client connected"));

        info!(observer_id = %observer.id(), observers = self.broadcaster.observer_count(), "Observer connected");
        Ok(observer)
    }

    pub fn observer_left(&self, observer: ObserverHandle) {
        let id = observer.id();
        self.broadcaster.unsubscribe(observer);
        info!(observer_id = %id, observers = self.broadcaster.observer_count(), "Observer disconnected");
    }

    /// Handle one text message from an observer
    ///
    /// Unparsable and unknown messages are logged and ignored.
    pub async fn handle_observer_message(&self, text: &str) -> Result<(), HubError> {
        let message: ObserverMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring unparsable observer message");
                return Ok(());
            }
        };

        match message.kind.as_str() {
            "set-leader" => {
                let Some(serial) = message.data.get("serial").and_then(Value::as_str) else {
                    warn!(data = %message.data, "set-leader without a serial");
                    return Ok(());
                };
                self.set_leader(serial).await
            }
            other => {
                debug!(kind = other, "Hub::handle_observer_message: unhandled type");
                Ok(())
            }
        }
    }

    async fn set_leader(&self, serial: &str) -> Result<(), HubError> {
        match self.registry.set_leader(serial).await {
            Ok(snapshot) => {
                info!(%serial, "Leader set");
                self.broadcaster.publish(&Envelope::log(format!("Leader set to {serial}")));
                self.publish_roster(&snapshot);
                Ok(())
            }
            Err(RegistryError::NotFound(id)) => {
                self.broadcaster
                    .publish(&Envelope::log(format!("Leader change ignored: unknown member {id}")));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn publish_roster(&self, snapshot: &[MemberRecord]) {
        self.broadcaster
            .publish(&Envelope::of(EnvelopeKind::Members, &member_summaries(snapshot)));
        self.broadcaster
            .publish(&Envelope::of(EnvelopeKind::GridUpdate, &grid_cells(snapshot)));
    }

    /// Listener is bound: start the clock and announce it
    pub fn mark_started(&self, port: u16) {
        if self.metrics.mark_started() {
            info!(port, "Server started");
            self.broadcaster
                .publish(&Envelope::log(format!("Server started on port {port}")));
        }
    }

    /// Heartbeat task bound to this hub's counters
    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(self.broadcaster.clone(), self.metrics.clone(), self.status_interval)
    }

    /// Flip the shutdown flag; in-flight engine runs are killed
    pub fn shutdown(&self) {
        info!("Hub shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Receiver that flips to true on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the registry actor; call after the transport has drained
    pub async fn close(&self) {
        self.shutdown();
        if let Err(e) = self.registry.shutdown().await {
            debug!(error = %e, "Hub::close: registry already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{PolicyError, PolicyOutput};
    use crate::domain::{Location, Point2};
    use async_trait::async_trait;

    struct FixedEngine(PolicyOutput);

    #[async_trait]
    impl PolicyEngine for FixedEngine {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn invoke(&self, _input: Vec<u8>) -> Result<PolicyOutput, PolicyError> {
            Ok(self.0.clone())
        }
    }

    fn hub(output: PolicyOutput) -> Hub {
        Hub::new(&Config::default(), Arc::new(FixedEngine(output)))
    }

    fn report(id: &str) -> MemberReport {
        MemberReport::new(id, Location::new(1.0, 2.0, 0.0)).with_leader(true)
    }

    async fn drain(observer: &mut ObserverHandle, count: usize) -> Vec<Value> {
        let mut out = Vec::new();
        for _ in 0..count {
            let raw = observer.recv().await.unwrap();
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_ingest_success() {
        let hub = hub(PolicyOutput::success(r#"{"action":"hold"}"#));

        let body = hub.ingest_report(report("m1"), 120).await.unwrap();
        assert_eq!(body, json!({"action": "hold"}));

        let snapshot = hub.registry().snapshot().await.unwrap();
        assert_eq!(snapshot[0].task, Some(json!({"action": "hold"})));
        assert_eq!(hub.metrics().requests(), 1);
        assert_eq!(hub.metrics().bytes_in(), 120);
    }

    #[tokio::test]
    async fn test_ingest_engine_failure_body() {
        let hub = hub(PolicyOutput::failure(1));

        let body = hub.ingest_report(report("m2"), 10).await.unwrap();
        assert_eq!(body, json!({"error": "Hivemind processing failed"}));

        let snapshot = hub.registry().snapshot().await.unwrap();
        assert!(snapshot[0].task.is_none());
    }

    #[tokio::test]
    async fn test_ingest_publish_order() {
        let hub = hub(PolicyOutput::success("{}"));
        let mut observer = hub.broadcaster().subscribe();

        hub.ingest_report(report("m1"), 1).await.unwrap();

        let got = drain(&mut observer, 5).await;
        assert!(got[0]["data"].as_str().unwrap().starts_with("Current clients: "));
        assert_eq!(got[1]["type"], "members");
        assert_eq!(got[1]["data"][0]["serial"], "m1");
        assert_eq!(got[2]["type"], "grid-update");
        assert!(got[3]["data"].as_str().unwrap().starts_with("Received data from m1: "));
        assert_eq!(got[4]["data"], "Task for m1: {}");
    }

    #[tokio::test]
    async fn test_update_member_keeps_task_and_skips_engine() {
        let hub = hub(PolicyOutput::success(r#"{"action":"hold"}"#));
        hub.ingest_report(report("m1"), 1).await.unwrap();

        let moved = MemberReport::new("m1", Location::new(9.0, 9.0, 0.0));
        assert!(hub.update_member(moved).await.unwrap());
        assert_eq!(hub.metrics().requests(), 1);

        let snapshot = hub.registry().snapshot().await.unwrap();
        assert_eq!(snapshot[0].location, Location::new(9.0, 9.0, 0.0));
        assert_eq!(snapshot[0].task, Some(json!({"action": "hold"})));
    }

    #[tokio::test]
    async fn test_update_member_logs_brief_view() {
        let hub = hub(PolicyOutput::success(r#"{"action":"hold"}"#));
        hub.ingest_report(report("m1"), 1).await.unwrap();
        let mut observer = hub.broadcaster().subscribe();

        let moved = MemberReport::new("m1", Location::new(9.0, 9.5, 0.0)).with_mobile("t1", Point2::new(1.0, 1.0));
        hub.update_member(moved).await.unwrap();

        let got = drain(&mut observer, 1).await;
        assert_eq!(
            got[0]["data"],
            r#"Updated client m1 in server: {"id":"m1","location":{"xCoord":9,"yCoord":9.5,"zCoord":0}}"#
        );
    }

    #[tokio::test]
    async fn test_update_unknown_member_is_noop() {
        let hub = hub(PolicyOutput::success("{}"));
        assert!(!hub.update_member(report("ghost")).await.unwrap());
        assert!(hub.registry().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_observer_burst() {
        let hub = hub(PolicyOutput::success("{}"));
        hub.ingest_report(report("m1"), 1).await.unwrap();

        let mut observer = hub.observer_joined().await.unwrap();
        let burst = drain(&mut observer, 3).await;

        assert_eq!(burst[0]["type"], "members");
        assert_eq!(burst[0]["data"][0]["serial"], "m1");
        assert_eq!(burst[1]["type"], "scenarios");
        assert_eq!(burst[1]["data"], json!(["follow_leader"]));
        assert_eq!(burst[2]["type"], "options");
        assert_eq!(burst[2]["data"]["maxDistanceFromLeader"], 2);

        let announced = drain(&mut observer, 1).await;
        assert_eq!(announced[0]["type"], "log");
        assert_eq!(announced[0]["data"], "WebSocket client connected");

        hub.observer_left(observer);
        assert_eq!(hub.broadcaster().observer_count(), 0);
    }

    #[tokio::test]
    async fn test_set_leader_message() {
        let hub = hub(PolicyOutput::success("{}"));
        hub.ingest_report(report("m1"), 1).await.unwrap();
        hub.ingest_report(MemberReport::new("m2", Location::default()), 1).await.unwrap();
        let mut observer = hub.broadcaster().subscribe();

        hub.handle_observer_message(r#"{"type":"set-leader","data":{"serial":"m2"}}"#)
            .await
            .unwrap();

        let got = drain(&mut observer, 3).await;
        assert_eq!(got[0]["data"], "Leader set to m2");
        assert_eq!(got[1]["type"], "members");
        assert_eq!(got[1]["data"][0]["leader"], false);
        assert_eq!(got[1]["data"][1]["leader"], true);
        assert_eq!(got[2]["type"], "grid-update");
    }

    #[tokio::test]
    async fn test_set_leader_unknown_and_garbage() {
        let hub = hub(PolicyOutput::success("{}"));
        let mut observer = hub.broadcaster().subscribe();

        hub.handle_observer_message("not json").await.unwrap();
        hub.handle_observer_message(r#"{"type":"wave"}"#).await.unwrap();
        hub.handle_observer_message(r#"{"type":"set-leader","data":{"serial":"ghost"}}"#)
            .await
            .unwrap();

        let got = drain(&mut observer, 1).await;
        assert_eq!(got[0]["data"], "Leader change ignored: unknown member ghost");
    }

    #[tokio::test]
    async fn test_mark_started_announces_once() {
        let hub = hub(PolicyOutput::success("{}"));
        let mut observer = hub.broadcaster().subscribe();

        hub.mark_started(3000);
        hub.mark_started(3000);
        hub.broadcaster().publish(&Envelope::log("marker"));

        let got = drain(&mut observer, 2).await;
        assert_eq!(got[0]["data"], "Server started on port 3000");
        assert_eq!(got[1]["data"], "marker");
        assert!(hub.metrics().is_started());
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let hub = hub(PolicyOutput::success("{}"));
        let mut signal = hub.shutdown_signal();
        assert!(!hub.is_shutting_down());

        hub.shutdown();
        assert!(hub.is_shutting_down());
        shutdown_requested(&mut signal).await;

        hub.close().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.registry().snapshot().await.is_err());
    }
}
