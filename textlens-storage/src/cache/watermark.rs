//! Per-key mutation watermarks.
//!
//! A backfill is only safe if no update or delete touched the key between
//! the store read and the cache write. Writers advance the key's watermark
//! before they refresh or evict; readers capture it before reading the store
//! and compare afterwards.
//!
//! Keys hash onto a fixed number of slots, so memory stays bounded no matter
//! how many ids are mutated. Two keys sharing a slot only cost a skipped
//! backfill, never a stale entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use super::key::CacheKey;

const DEFAULT_SLOTS: usize = 4096;

/// Position in one slot's mutation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    slot: usize,
    sequence: u64,
}

impl Watermark {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Fixed table of mutation counters.
#[derive(Debug)]
pub struct WatermarkTable {
    slots: Box<[AtomicU64]>,
}

impl Default for WatermarkTable {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }
}

impl WatermarkTable {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots: (0..slots.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn slot(&self, key: &CacheKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.slots.len() as u64) as usize
    }

    /// Snapshot taken by a reader before it goes to the store.
    pub fn current(&self, key: &CacheKey) -> Watermark {
        let slot = self.slot(key);
        Watermark {
            slot,
            sequence: self.slots[slot].load(Ordering::SeqCst),
        }
    }

    /// Record a mutation of `key`. Call after the store commit and before
    /// touching the cache entry.
    pub fn advance(&self, key: &CacheKey) -> Watermark {
        let slot = self.slot(key);
        let sequence = self.slots[slot].fetch_add(1, Ordering::SeqCst) + 1;
        Watermark { slot, sequence }
    }

    /// Whether the slot has moved past `mark`.
    pub fn changed_since(&self, mark: Watermark) -> bool {
        self.slots[mark.slot].load(Ordering::SeqCst) != mark.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use textlens_core::{ArtifactId, Sentiment, Summary};

    #[test]
    fn test_advance_invalidates_earlier_marks() {
        let table = WatermarkTable::default();
        let key = CacheKey::for_kind::<Sentiment>(ArtifactId::new(1));

        let before = table.current(&key);
        assert!(!table.changed_since(before));

        let after = table.advance(&key);
        assert!(table.changed_since(before));
        assert!(!table.changed_since(after));
        assert!(after > before);
    }

    #[test]
    fn test_single_slot_table_is_conservative() {
        let table = WatermarkTable::with_slots(1);
        let a = CacheKey::for_kind::<Sentiment>(ArtifactId::new(1));
        let b = CacheKey::for_kind::<Summary>(ArtifactId::new(2));

        let mark = table.current(&a);
        table.advance(&b);
        assert!(table.changed_since(mark));
    }

    #[test]
    fn test_zero_slots_is_clamped() {
        let table = WatermarkTable::with_slots(0);
        let key = CacheKey::for_kind::<Summary>(ArtifactId::new(9));
        assert_eq!(table.advance(&key).sequence(), 1);
    }
}
