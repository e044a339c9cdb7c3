//! Request-to-slot directory.
//!
//! The directory maps live completion requests to the slot serving them.
//! It keeps both directions explicitly: a forward map keyed by request and a
//! reverse array indexed by slot, so that release-by-slot is O(1).

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use super::{RequestId, SlotIndex};
use crate::error::{Error, Result};

/// Unsynchronized two-way mapping. Accessed through [`Directory`].
#[derive(Debug)]
pub struct DirectoryTable {
    /// Request -> slot.
    forward: HashMap<RequestId, SlotIndex>,
    /// Slot -> request.
    reverse: Vec<Option<RequestId>>,
}

impl DirectoryTable {
    fn new(capacity: usize) -> Self {
        Self {
            forward: HashMap::with_capacity(capacity),
            reverse: vec![None; capacity],
        }
    }

    /// Record `request_id -> slot`.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the request already has a slot.
    /// - [`Error::SlotOutOfRange`] if `slot` is outside the pool.
    pub fn assign(&mut self, request_id: RequestId, slot: SlotIndex) -> Result<()> {
        if let Some(&existing) = self.forward.get(&request_id) {
            return Err(Error::Conflict {
                request_id,
                slot: existing,
            });
        }
        let capacity = self.reverse.len();
        let entry = self
            .reverse
            .get_mut(slot)
            .ok_or(Error::SlotOutOfRange { slot, capacity })?;

        // A slot maps to at most one request.
        if let Some(previous) = entry.replace(request_id) {
            self.forward.remove(&previous);
        }
        self.forward.insert(request_id, slot);
        Ok(())
    }

    /// Get the slot serving `request_id`.
    pub fn lookup(&self, request_id: RequestId) -> Option<SlotIndex> {
        self.forward.get(&request_id).copied()
    }

    /// Get the request served by `slot`.
    pub fn owner_of(&self, slot: SlotIndex) -> Option<RequestId> {
        self.reverse.get(slot).copied().flatten()
    }

    /// Remove whichever entry maps to `slot`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn release(&mut self, slot: SlotIndex) -> bool {
        match self.reverse.get_mut(slot).and_then(Option::take) {
            Some(request_id) => {
                self.forward.remove(&request_id);
                true
            }
            None => false,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Check whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Thread-safe request-to-slot directory.
///
/// Every operation runs under a single lock, so `assign`, `lookup` and
/// `release` are linearizable with respect to each other.
///
/// # Example
///
/// ```
/// use nano_slots::core::directory::Directory;
///
/// let directory = Directory::new(4);
/// directory.assign(100, 2).unwrap();
/// assert_eq!(directory.lookup(100), Some(2));
///
/// // A request can only hold one slot
/// assert!(directory.assign(100, 3).is_err());
///
/// assert!(directory.release(2));
/// assert_eq!(directory.lookup(100), None);
/// assert!(!directory.release(2));
/// ```
#[derive(Debug)]
pub struct Directory {
    table: Mutex<DirectoryTable>,
}

impl Directory {
    /// Create an empty directory for a pool of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(DirectoryTable::new(capacity)),
        }
    }

    /// Lock the directory for a compound operation.
    ///
    /// Slot locks may be taken while this guard is held, never the reverse.
    pub fn lock(&self) -> MutexGuard<'_, DirectoryTable> {
        self.table.lock()
    }

    /// See [`DirectoryTable::assign`].
    pub fn assign(&self, request_id: RequestId, slot: SlotIndex) -> Result<()> {
        self.lock().assign(request_id, slot)
    }

    /// See [`DirectoryTable::lookup`].
    pub fn lookup(&self, request_id: RequestId) -> Option<SlotIndex> {
        self.lock().lookup(request_id)
    }

    /// See [`DirectoryTable::owner_of`].
    pub fn owner_of(&self, slot: SlotIndex) -> Option<RequestId> {
        self.lock().owner_of(slot)
    }

    /// See [`DirectoryTable::release`].
    pub fn release(&self, slot: SlotIndex) -> bool {
        self.lock().release(slot)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_lookup() {
        let directory = Directory::new(4);
        assert!(directory.is_empty());

        directory.assign(10, 0).unwrap();
        directory.assign(11, 3).unwrap();

        assert_eq!(directory.lookup(10), Some(0));
        assert_eq!(directory.lookup(11), Some(3));
        assert_eq!(directory.lookup(12), None);
        assert_eq!(directory.owner_of(3), Some(11));
        assert_eq!(directory.owner_of(1), None);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_conflict_leaves_state_untouched() {
        let directory = Directory::new(4);
        directory.assign(10, 0).unwrap();

        let err = directory.assign(10, 1).unwrap_err();
        assert!(matches!(err, Error::Conflict { request_id: 10, slot: 0 }));
        assert_eq!(directory.lookup(10), Some(0));
        assert_eq!(directory.owner_of(1), None);
    }

    #[test]
    fn test_assign_out_of_range() {
        let directory = Directory::new(2);
        assert!(matches!(
            directory.assign(1, 2),
            Err(Error::SlotOutOfRange { slot: 2, capacity: 2 })
        ));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_reassign_slot_drops_stale_entry() {
        let directory = Directory::new(2);
        directory.assign(1, 0).unwrap();
        directory.assign(2, 0).unwrap();

        assert_eq!(directory.lookup(1), None);
        assert_eq!(directory.lookup(2), Some(0));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_release_by_slot() {
        let directory = Directory::new(3);
        directory.assign(5, 1).unwrap();
        directory.assign(6, 2).unwrap();

        assert!(directory.release(1));
        assert_eq!(directory.lookup(5), None);
        assert_eq!(directory.lookup(6), Some(2));

        assert!(!directory.release(1));
        assert!(!directory.release(0));
        assert!(!directory.release(99));
    }
}
