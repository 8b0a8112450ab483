//! Envelopes pushed to observers

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Observer-facing message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    Log,
    Members,
    GridUpdate,
    Status,
    Options,
    Scenarios,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Members => "members",
            Self::GridUpdate => "grid-update",
            Self::Status => "status",
            Self::Options => "options",
            Self::Scenarios => "scenarios",
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged `{type, data}` message; never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    pub data: Value,

    /// Unix ms at construction; ignored when deduplicating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(kind: EnvelopeKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Create an envelope from any serializable payload
    pub fn of<T: Serialize>(kind: EnvelopeKind, payload: &T) -> Self {
        Self::new(kind, serde_json::to_value(payload).unwrap_or_default())
    }

    /// Free-text log line
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Log, Value::String(message.into()))
    }

    /// Canonical serialization with `timestamp` removed
    pub fn dedup_key(&self) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("timestamp");
        }
        serde_json::to_string(&value)
    }

    /// Wire form sent to observers
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
