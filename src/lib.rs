//! HiveHub - real-time coordination hub for a swarm of collective members
//!
//! Members report their position and tracked mobiles over HTTP. The hub keeps
//! an aggregate view of the swarm, asks an external policy engine for each
//! member's next task, and pushes the aggregate state to observers over a
//! WebSocket.
//!
//! # Core Concepts
//!
//! - **Staleness**: members silent for longer than the threshold are evicted
//! - **Deduplicated fan-out**: identical envelopes are sent once per dedup epoch
//! - **One engine run per report**: bounded in concurrency and time
//! - **Coerced options**: option updates never fail, they are clamped
//!
//! # Modules
//!
//! - [`registry`] - Member state with the actor pattern
//! - [`broadcast`] - Observer fan-out and deduplication
//! - [`bridge`] - Policy engine invocation
//! - [`options`] - Shared simulation options
//! - [`status`] - Counters and the status heartbeat
//! - [`hub`] - Composition root
//! - [`server`] - HTTP and WebSocket transport
//! - [`daemon`] - Background process supervision
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod bridge;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod hub;
pub mod options;
pub mod registry;
pub mod server;
pub mod status;

// Re-export commonly used types
pub use bridge::{DecisionBridge, PolicyEngine, PolicyError, PolicyOutput, ProcessPolicyEngine};
pub use broadcast::{Broadcaster, DedupCache, ObserverHandle, PublishOutcome};
pub use config::Config;
pub use domain::{
    AttackStyle, Envelope, EnvelopeKind, IngestError, Location, MemberRecord, MemberReport, Point2, SimulationOptions,
};
pub use hub::{Hub, HubError};
pub use options::OptionsRegistry;
pub use registry::{ClientStateStore, LeaderPolicy, RegistryError, RegistryManager};
pub use status::{HubMetrics, StatusReporter, StatusSnapshot};
