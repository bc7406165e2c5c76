//! Per-key request coalescing.
//!
//! Concurrent idempotent creates for the same natural key are serialized
//! through one async mutex per key, so only the first caller computes and
//! inserts; the rest find its row on their own lookup. Slots are removed as
//! soon as nobody holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

/// Table of in-flight keys.
#[derive(Debug, Default)]
pub struct SingleFlight {
    slots: Arc<DashMap<String, Slot>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder of `key` is active, then hold it.
    pub async fn acquire(&self, key: impl Into<String>) -> FlightGuard {
        let key = key.into();
        let slot = self.slots.entry(key.clone()).or_default().value().clone();
        let guard = slot.lock_owned().await;
        FlightGuard {
            key,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

/// Exclusive hold on one key. Released on drop.
#[derive(Debug)]
pub struct FlightGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<DashMap<String, Slot>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Unlock first so the guard's own reference no longer counts.
        self.guard.take();
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}
