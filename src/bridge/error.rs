//! Policy engine error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during one decision cycle
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Failed to spawn policy engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Policy engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Policy engine exited with code {code}")]
    Exit { code: i32 },

    #[error("Policy engine terminated by signal")]
    Terminated,

    #[error("Policy engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Policy engine output is not valid JSON: {0}")]
    InvalidOutput(#[source] serde_json::Error),

    #[error("Hub is shutting down")]
    Shutdown,

    #[error("Failed to serialize policy input: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl PolicyError {
    /// Check if the engine ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, PolicyError::Timeout(_))
    }

    /// Exit code for a non-zero exit
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PolicyError::Exit { code } => Some(*code),
            _ => None,
        }
    }
}
