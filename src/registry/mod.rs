//! Member registry with the actor pattern
//!
//! [`ClientStateStore`] holds member id to latest state and owns staleness
//! eviction. [`RegistryManager`] owns the store and processes messages via
//! channels, so each upsert-plus-eviction is a single consistent step.

mod manager;
mod messages;
mod projection;
mod store;

pub use manager::{DEFAULT_CHANNEL_BUFFER, RegistryManager};
pub use messages::{RegistryCommand, RegistryError, RegistryResponse, UpsertOutcome};
pub use projection::{GridCell, GridCellKind, MemberState, MemberSummary, Position, grid_cells, member_summaries};
pub use store::{ClientStateStore, DEFAULT_STALE_AFTER_MS, LeaderPolicy};
