//! DecisionBridge - one policy decision per full member report
//!
//! Bounds concurrent engine runs with a semaphore, enforces a timeout, and
//! aborts everything when the hub shuts down. Successful tasks are merged
//! back into the registry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::PolicyConfig;
use crate::domain::{Envelope, MemberRecord, SimulationOptions};
use crate::hub::shutdown_requested;
use crate::registry::RegistryManager;

use super::engine::{PolicyEngine, PolicyOutput};
use super::error::PolicyError;

/// Body returned to a member when no task could be produced
pub const ENGINE_FAILURE_MESSAGE: &str = "Hivemind processing failed";

/// Document written to the engine's stdin
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRequest<'a> {
    collective: &'a [MemberRecord],
    client_serial: &'a str,
    options: &'a SimulationOptions,
}

#[derive(Clone)]
pub struct DecisionBridge {
    engine: Arc<dyn PolicyEngine>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
    log_marker: Arc<str>,
    registry: RegistryManager,
    broadcaster: Arc<Broadcaster>,
    shutdown: watch::Receiver<bool>,
}

impl DecisionBridge {
    pub fn new(
        engine: Arc<dyn PolicyEngine>,
        config: &PolicyConfig,
        registry: RegistryManager,
        broadcaster: Arc<Broadcaster>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        debug!(engine = engine.name(), max_concurrent = config.max_concurrent, timeout_ms = config.timeout_ms, "DecisionBridge::new: called");
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout: config.timeout(),
            log_marker: Arc::from(config.log_marker.as_str()),
            registry,
            broadcaster,
            shutdown,
        }
    }

    /// Engine runs currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.permits.available_permits())
    }

    /// Ask the policy engine for `member_id`'s next task
    ///
    /// On success the task is merged into the registry (a no-op if the member
    /// was evicted meanwhile) and announced to observers. Every failure is
    /// announced too; the caller only decides what to tell the member.
    pub async fn decide(
        &self,
        member_id: &str,
        collective: &[MemberRecord],
        options: &SimulationOptions,
    ) -> Result<Value, PolicyError> {
        debug!(%member_id, collective = collective.len(), "DecisionBridge::decide: called");

        match self.run(member_id, collective, options).await {
            Ok(task) => {
                match self.registry.merge_task(member_id, task.clone()).await {
                    Ok(true) => debug!(%member_id, "DecisionBridge::decide: task merged"),
                    Ok(false) => debug!(%member_id, "DecisionBridge::decide: member evicted before task arrived"),
                    Err(e) => warn!(%member_id, error = %e, "DecisionBridge::decide: could not merge task"),
                }
                info!(%member_id, %task, "Task decided");
                self.broadcaster
                    .publish(&Envelope::log(format!("Task for {member_id}: {task}")));
                Ok(task)
            }
            Err(e) => {
                warn!(%member_id, error = %e, "Policy engine failed");
                let message = match e.exit_code() {
                    Some(code) => format!("Hivemind process exited with code {code}"),
                    None => format!("{ENGINE_FAILURE_MESSAGE} for {member_id}: {e}"),
                };
                self.broadcaster.publish(&Envelope::log(message));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        member_id: &str,
        collective: &[MemberRecord],
        options: &SimulationOptions,
    ) -> Result<Value, PolicyError> {
        let request = PolicyRequest {
            collective,
            client_serial: member_id,
            options,
        };
        let input = serde_json::to_vec(&request).map_err(PolicyError::Serialize)?;

        let invocation = async {
            let _permit = self.permits.acquire().await.map_err(|_| PolicyError::Shutdown)?;
            debug!(%member_id, engine = self.engine.name(), "DecisionBridge::run: permit acquired");
            tokio::time::timeout(self.timeout, self.engine.invoke(input))
                .await
                .map_err(|_| PolicyError::Timeout(self.timeout))?
        };

        // Dropping the invocation kills the child
        let mut shutdown = self.shutdown.clone();
        let output = tokio::select! {
            result = invocation => result?,
            _ = shutdown_requested(&mut shutdown) => {
                debug!(%member_id, "DecisionBridge::run: aborted by shutdown");
                return Err(PolicyError::Shutdown);
            }
        };

        self.report_diagnostics(member_id, &output);

        match output.code {
            Some(0) => serde_json::from_slice(&output.stdout).map_err(PolicyError::InvalidOutput),
            Some(code) => Err(PolicyError::Exit { code }),
            None => Err(PolicyError::Terminated),
        }
    }

    /// Route engine stderr: marked lines are tracing, the rest are errors
    fn report_diagnostics(&self, member_id: &str, output: &PolicyOutput) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.contains(&*self.log_marker) {
                debug!(%member_id, "{line}");
            } else {
                warn!(%member_id, line, "Policy engine error output");
                self.broadcaster.publish(&Envelope::log(format!("Hivemind error: {line}")));
            }
        }
    }
}
