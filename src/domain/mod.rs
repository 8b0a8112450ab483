//! Domain types for HiveHub
//!
//! Typed forms of everything that crosses the hub's boundaries: member reports
//! coming in, records held in the registry, options handed to the policy
//! engine, and envelopes pushed out to observers.

mod envelope;
mod member;
mod options;

pub use envelope::{Envelope, EnvelopeKind};
pub(crate) use member::serialize_coord;
pub use member::{IngestError, Location, MemberRecord, MemberReport, Point2};
pub use options::{AttackStyle, DEFAULT_DISTANCE_FROM_LEADER, MAX_DISTANCE_FROM_LEADER, SimulationOptions};
