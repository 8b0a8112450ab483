//! Observer fan-out with content deduplication
//!
//! [`Broadcaster`] delivers envelopes to every connected observer and drops
//! repeats via a bounded [`DedupCache`].

mod bus;
mod dedup;

pub use bus::{Broadcaster, DEFAULT_CHANNEL_CAPACITY, ObserverHandle, PublishOutcome};
pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupCache};
