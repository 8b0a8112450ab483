//! Delegation of per-member decisions to an external policy engine

mod decision;
mod engine;
mod error;

pub use decision::{DecisionBridge, ENGINE_FAILURE_MESSAGE};
pub use engine::{PolicyEngine, PolicyOutput, ProcessPolicyEngine};
pub use error::PolicyError;
