//! Single-slot, last-write-wins handoff between the coordinator and the
//! fleet worker.

use crate::snapshot::RingSnapshot;
use bytes::Bytes;
use parking_lot::Mutex;
use ringkeeper_core::{Ring, RingVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A committed ring to push to the fleet.
#[derive(Debug, Clone)]
pub struct FleetUpdate {
    /// Ring version.
    pub version: RingVersion,
    /// Decoded ring.
    pub ring: Arc<Ring>,
    /// Serialized ring, as sent to members.
    pub ring_bytes: Bytes,
}

impl FleetUpdate {
    /// The update for a snapshot.
    pub fn from_snapshot(snapshot: &RingSnapshot) -> Self {
        Self {
            version: snapshot.version(),
            ring: Arc::clone(snapshot.ring()),
            ring_bytes: snapshot.ring_bytes().clone(),
        }
    }
}

/// Holds at most one pending [`FleetUpdate`]. Posting replaces whatever is
/// pending, so a slow consumer only ever sees the newest ring.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<FleetUpdate>>,
    closed: AtomicBool,
    notify: Notify,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post an update. Never blocks.
    pub fn post(&self, update: FleetUpdate) {
        let replaced = self.slot.lock().replace(update);
        if let Some(old) = replaced {
            tracing::debug!(version = old.version, "coalesced unsent fleet update");
        }
        self.notify.notify_one();
    }

    /// Wait for the next update. `None` once the mailbox is closed and empty.
    pub async fn take(&self) -> Option<FleetUpdate> {
        loop {
            let pending = self.slot.lock().take();
            if pending.is_some() {
                return pending;
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop the consumer after it drains the slot.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}
