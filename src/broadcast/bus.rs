//! Broadcaster - deduplicated fan-out to observers
//!
//! The Broadcaster uses a tokio broadcast channel to deliver serialized
//! envelopes to every connected observer. Publishes whose content (minus
//! `timestamp`) was already sent this dedup epoch are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::Envelope;
use crate::status::HubMetrics;

use super::dedup::{DEFAULT_DEDUP_CAPACITY, DedupCache};

/// Default per-observer backlog (messages)
/// At a few envelopes per member report this absorbs several seconds of burst
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What happened to a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered to `observers` open channels, `bytes` counted in total
    Sent { observers: usize, bytes: u64 },
    /// Same content already published this epoch
    Suppressed,
}

impl PublishOutcome {
    pub fn was_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Fan-out point for every observer-facing envelope
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<str>>,
    dedup: Mutex<DedupCache>,
    metrics: Arc<HubMetrics>,
}

impl Broadcaster {
    pub fn new(channel_capacity: usize, dedup_capacity: usize, metrics: Arc<HubMetrics>) -> Self {
        debug!(channel_capacity, dedup_capacity, "Broadcaster::new: called");
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            tx,
            dedup: Mutex::new(DedupCache::new(dedup_capacity)),
            metrics,
        }
    }

    pub fn with_defaults(metrics: Arc<HubMetrics>) -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY, DEFAULT_DEDUP_CAPACITY, metrics)
    }

    /// Publish an envelope unless an identical one was sent this epoch
    ///
    /// The dedup check, the send and the key insertion happen under one lock.
    pub fn publish(&self, envelope: &Envelope) -> PublishOutcome {
        let (key, payload) = match (envelope.dedup_key(), envelope.to_json()) {
            (Ok(key), Ok(payload)) => (key, payload),
            (Err(e), _) | (_, Err(e)) => {
                warn!(kind = %envelope.kind, error = %e, "Broadcaster::publish: unserializable envelope dropped");
                return PublishOutcome::Suppressed;
            }
        };

        let mut dedup = self.dedup.lock().unwrap_or_else(PoisonError::into_inner);
        if dedup.contains(&key) {
            debug!(kind = %envelope.kind, "Broadcaster::publish: duplicate suppressed");
            return PublishOutcome::Suppressed;
        }

        let size = payload.len() as u64;
        // No subscribers is OK
        let observers = self.tx.send(Arc::from(payload)).unwrap_or(0);
        dedup.insert(&key);
        drop(dedup);

        let bytes = size * observers as u64;
        self.metrics.add_bytes_out(bytes);
        debug!(kind = %envelope.kind, observers, bytes, "Broadcaster::publish: sent");
        PublishOutcome::Sent { observers, bytes }
    }

    /// Register a new observer
    ///
    /// The handle sees every envelope published after this call. Use
    /// [`ObserverHandle::queue_direct`] to give it a full-state burst first.
    pub fn subscribe(&self) -> ObserverHandle {
        let handle = ObserverHandle {
            id: Uuid::now_v7(),
            direct: VecDeque::new(),
            rx: self.tx.subscribe(),
        };
        debug!(observer_id = %handle.id, observers = self.observer_count(), "Broadcaster::subscribe: new observer");
        handle
    }

    /// Detach an observer
    pub fn unsubscribe(&self, handle: ObserverHandle) {
        let id = handle.id;
        drop(handle);
        debug!(observer_id = %id, observers = self.observer_count(), "Broadcaster::unsubscribe: observer left");
    }

    /// Number of currently open observer channels
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Number of keys in the current dedup epoch
    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// One observer's view of the broadcast stream
pub struct ObserverHandle {
    id: Uuid,
    direct: VecDeque<String>,
    rx: broadcast::Receiver<Arc<str>>,
}

impl ObserverHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue envelopes for this observer only, ahead of broadcast traffic
    ///
    /// Bypasses deduplication and byte accounting.
    pub fn queue_direct(&mut self, envelopes: &[Envelope]) {
        for envelope in envelopes {
            match envelope.to_json() {
                Ok(payload) => self.direct.push_back(payload),
                Err(e) => warn!(observer_id = %self.id, error = %e, "ObserverHandle: unserializable envelope skipped"),
            }
        }
    }

    /// Next message for this observer; `None` once the broadcaster is gone
    ///
    /// A lagging observer skips what it missed rather than being dropped.
    pub async fn recv(&mut self) -> Option<String> {
        if let Some(payload) = self.direct.pop_front() {
            return Some(payload);
        }

        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload.to_string()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(observer_id = %self.id, skipped, "Observer lagging, skipped messages");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
