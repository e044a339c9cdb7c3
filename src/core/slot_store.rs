//! Fixed arena of lockable slots.
//!
//! The store allocates one [`Slot`] per index at construction and never
//! reallocates them. Each slot sits behind its own mutex so decode workers
//! driving different slots never contend with each other.

use parking_lot::{Mutex, MutexGuard};

use super::slot::{Slot, SlotSnapshot};
use super::{SlotIndex, TokenId};
use crate::error::{Error, Result};

/// Arena of `capacity` independently locked slots.
///
/// # Example
///
/// ```
/// use nano_slots::core::slot_store::SlotStore;
///
/// let store = SlotStore::new(4);
/// assert_eq!(store.capacity(), 4);
/// assert_eq!(store.num_busy(), 0);
/// assert!(!store.is_busy(0).unwrap());
/// assert!(store.get(4).is_err());
/// ```
#[derive(Debug)]
pub struct SlotStore {
    slots: Box<[Mutex<Slot>]>,
}

impl SlotStore {
    /// Create a store with `capacity` idle slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(Slot::default())).collect();
        Self { slots }
    }

    /// Number of slots in the arena.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lock a slot.
    ///
    /// The guard must not be held while taking the directory lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SlotOutOfRange`] for indices outside the arena.
    pub fn get(&self, index: SlotIndex) -> Result<MutexGuard<'_, Slot>> {
        self.slots
            .get(index)
            .map(|slot| slot.lock())
            .ok_or(Error::SlotOutOfRange {
                slot: index,
                capacity: self.slots.len(),
            })
    }

    /// Lock every slot in ascending index order, one at a time.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotIndex, MutexGuard<'_, Slot>)> {
        self.slots.iter().enumerate().map(|(i, slot)| (i, slot.lock()))
    }

    // ========== Monitoring accessors ==========

    /// Check whether a slot is occupied.
    pub fn is_busy(&self, index: SlotIndex) -> Result<bool> {
        Ok(self.get(index)?.is_busy())
    }

    /// Get a slot's last produced token.
    pub fn last_token(&self, index: SlotIndex) -> Result<Option<TokenId>> {
        Ok(self.get(index)?.last_token())
    }

    /// Get a slot's context position.
    pub fn position(&self, index: SlotIndex) -> Result<usize> {
        Ok(self.get(index)?.position())
    }

    /// Get a copy of a slot's generated text.
    pub fn output(&self, index: SlotIndex) -> Result<String> {
        Ok(self.get(index)?.output().to_string())
    }

    /// Get a copy of a slot's generated tokens.
    pub fn output_tokens(&self, index: SlotIndex) -> Result<Vec<TokenId>> {
        Ok(self.get(index)?.output_tokens().to_vec())
    }

    /// Snapshot a single slot.
    pub fn snapshot(&self, index: SlotIndex) -> Result<SlotSnapshot> {
        Ok(self.get(index)?.snapshot(index))
    }

    /// Snapshot every slot. Each slot is locked separately, so the result is
    /// not a consistent cut across slots.
    pub fn snapshots(&self) -> Vec<SlotSnapshot> {
        self.iter().map(|(i, slot)| slot.snapshot(i)).collect()
    }

    /// Count occupied slots.
    pub fn num_busy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().is_busy()).count()
    }
}
