//! HiveHub configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::broadcast::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_DEDUP_CAPACITY};
use crate::registry::{DEFAULT_CHANNEL_BUFFER, DEFAULT_STALE_AFTER_MS, LeaderPolicy};
use crate::status::DEFAULT_STATUS_INTERVAL_MS;

/// Main HiveHub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,

    /// External policy engine
    pub policy: PolicyConfig,

    /// Member registry
    pub registry: RegistryConfig,

    /// Observer fan-out
    pub broadcast: BroadcastConfig,

    /// Status heartbeat
    pub status: StatusConfig,

    /// Named behaviors advertised to observers on connect
    pub scenarios: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            policy: PolicyConfig::default(),
            registry: RegistryConfig::default(),
            broadcast: BroadcastConfig::default(),
            status: StatusConfig::default(),
            scenarios: vec!["follow_leader".to_string()],
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.policy.program.trim().is_empty() {
            return Err(eyre::eyre!("policy.program must not be empty"));
        }
        if self.policy.max_concurrent == 0 {
            return Err(eyre::eyre!("policy.max-concurrent must be at least 1"));
        }
        if self.policy.timeout_ms == 0 {
            return Err(eyre::eyre!("policy.timeout-ms must be at least 1"));
        }
        if self.broadcast.dedup_capacity == 0 {
            return Err(eyre::eyre!("broadcast.dedup-capacity must be at least 1"));
        }
        if self.status.interval_ms == 0 {
            return Err(eyre::eyre!("status.interval-ms must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .hivehub.yml
        let local_config = PathBuf::from(".hivehub.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/hivehub/hivehub.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("hivehub").join("hivehub.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// External policy engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Executable to run once per full report
    pub program: String,

    pub args: Vec<String>,

    /// Working directory for the engine (defaults to the hub's)
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Per-invocation timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Maximum engine processes alive at once
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Stderr lines containing this are the engine's own tracing
    #[serde(rename = "log-marker")]
    pub log_marker: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["Hivemind.py".to_string()],
            working_dir: None,
            timeout_ms: 5_000,
            max_concurrent: 8,
            log_marker: "[Hivemind Log]".to_string(),
        }
    }
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Member registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Members silent for longer than this are evicted
    #[serde(rename = "stale-after-ms")]
    pub stale_after_ms: i64,

    #[serde(rename = "leader-policy")]
    pub leader_policy: LeaderPolicy,

    /// Registry actor command queue depth
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            leader_policy: LeaderPolicy::default(),
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

/// Observer fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Distinct envelopes remembered before the dedup cache resets
    #[serde(rename = "dedup-capacity")]
    pub dedup_capacity: usize,

    /// Per-observer backlog before a slow observer starts skipping
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

impl StatusConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.policy.program, "python");
        assert_eq!(config.policy.timeout_ms, 5_000);
        assert_eq!(config.registry.stale_after_ms, 5_000);
        assert_eq!(config.broadcast.dedup_capacity, 1_000);
        assert_eq!(config.status.interval_ms, 1_000);
        assert_eq!(config.scenarios, vec!["follow_leader".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 4100

policy:
  program: python3
  args: ["engine/Hivemind.py", "--quiet"]
  working-dir: /opt/hive
  timeout-ms: 2500
  max-concurrent: 2
  log-marker: "[Engine]"

registry:
  stale-after-ms: 8000
  leader-policy: permissive

broadcast:
  dedup-capacity: 50

scenarios: ["follow_leader", "encircle"]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:4100");
        assert_eq!(config.policy.program, "python3");
        assert_eq!(config.policy.args.len(), 2);
        assert_eq!(config.policy.working_dir, Some(PathBuf::from("/opt/hive")));
        assert_eq!(config.policy.timeout(), Duration::from_millis(2500));
        assert_eq!(config.policy.max_concurrent, 2);
        assert_eq!(config.policy.log_marker, "[Engine]");
        assert_eq!(config.registry.stale_after_ms, 8_000);
        assert_eq!(config.registry.leader_policy, LeaderPolicy::Permissive);
        assert_eq!(config.broadcast.dedup_capacity, 50);
        assert_eq!(config.scenarios.len(), 2);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
server:
  port: 9000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.server.port, 9000);

        // Defaults for unspecified
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.policy.args, vec!["Hivemind.py".to_string()]);
        assert_eq!(config.registry.leader_policy, LeaderPolicy::Exclusive);
        assert_eq!(config.broadcast.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.policy.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.policy.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.policy.program = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.broadcast.dedup_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 3456").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.server.port, 3456);
    }

    #[test]
    fn test_load_explicit_path_missing_is_error() {
        let missing = PathBuf::from("/nonexistent/hivehub.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }
}
