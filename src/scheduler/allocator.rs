//! Slot allocator.
//!
//! The [`SlotScheduler`] composes the [`SlotStore`] and the [`Directory`]
//! into the operations completion handlers call: acquire a slot for a
//! request, write decode results into it, and release it.
//!
//! ## Locking
//!
//! ```text
//!   acquire / release / cancel          decode path / monitoring
//!            │                                    │
//!            ▼                                    │
//!   ┌──────────────────┐                          │
//!   │  Directory lock  │  (held for the whole op) │
//!   └──────────────────┘                          │
//!            │                                    ▼
//!            ▼                            ┌──────────────┐
//!   ┌──────────────────┐                  │  slot lock   │
//!   │ slot lock 0..n   │ ◄── one at a ──  │   (single)   │
//!   └──────────────────┘      time        └──────────────┘
//! ```
//!
//! The directory lock is always taken before a slot lock and never while a
//! slot lock is held, so the two paths cannot deadlock.
//!
//! ## Example
//!
//! ```
//! use nano_slots::core::StopPattern;
//! use nano_slots::scheduler::SlotScheduler;
//!
//! let scheduler = SlotScheduler::new(2, StopPattern::none());
//!
//! let a = scheduler.acquire(10).unwrap();
//! let b = scheduler.acquire(11).unwrap();
//! assert_eq!((a, b), (0, 1));
//!
//! // Pool exhausted
//! assert!(scheduler.acquire(12).is_err());
//!
//! assert!(scheduler.release(10));
//! assert_eq!(scheduler.acquire(12).unwrap(), 0);
//! ```

use tracing::{debug, warn};

use crate::core::directory::DirectoryTable;
use crate::core::{
    Directory, MediaBuffer, RequestId, Slot, SlotIndex, SlotSnapshot, SlotStore, StopPattern,
    TokenId,
};
use crate::error::{Error, Result};

/// Result of recording one decoded token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Slot position after the token was recorded.
    pub position: usize,
    /// The generated tokens now end with the stop pattern.
    pub stop_matched: bool,
    /// Cancellation was requested for this request.
    pub cancel_requested: bool,
}

/// Thread-safe scheduler over a fixed pool of sequence slots.
///
/// Share it between threads with `Arc<SlotScheduler>`; all methods take
/// `&self`.
#[derive(Debug)]
pub struct SlotScheduler {
    /// Per-slot generation state.
    store: SlotStore,
    /// Request -> slot mapping.
    directory: Directory,
    /// Legacy antiprompt, empty for templates with end-of-turn markup.
    stop_pattern: StopPattern,
}

impl SlotScheduler {
    /// Create a scheduler with `capacity` idle slots.
    pub fn new(capacity: usize, stop_pattern: StopPattern) -> Self {
        Self {
            store: SlotStore::new(capacity),
            directory: Directory::new(capacity),
            stop_pattern,
        }
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Get the configured stop pattern.
    pub fn stop_pattern(&self) -> &StopPattern {
        &self.stop_pattern
    }

    /// Get the underlying slot store.
    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    // ========== Allocation ==========

    /// Acquire a slot for `request_id`.
    ///
    /// If the request already owns a slot, that slot is returned unchanged.
    /// Otherwise the lowest-indexed free slot is claimed, its state reset and
    /// the mapping recorded. Never waits for a slot to free up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFreeSlot`] if every slot is busy.
    pub fn acquire(&self, request_id: RequestId) -> Result<SlotIndex> {
        let mut directory = self.directory.lock();

        if let Some(index) = directory.lookup(request_id) {
            debug!(request_id, slot = index, "request already owns slot");
            return Ok(index);
        }
        self.claim_free(&mut directory, request_id)
    }

    /// Acquire a fresh slot for `request_id`.
    ///
    /// Unlike [`acquire`](Self::acquire), a request that already owns a slot
    /// is rejected, so the caller knows it holds the only claim and is the
    /// one that must release it.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the request already owns a slot.
    /// - [`Error::NoFreeSlot`] if every slot is busy.
    pub fn acquire_new(&self, request_id: RequestId) -> Result<SlotIndex> {
        let mut directory = self.directory.lock();

        if let Some(slot) = directory.lookup(request_id) {
            warn!(request_id, slot, "request already owns a slot");
            return Err(Error::Conflict { request_id, slot });
        }
        self.claim_free(&mut directory, request_id)
    }

    /// Claim the lowest-indexed free slot. Caller holds the directory lock.
    fn claim_free(
        &self,
        directory: &mut DirectoryTable,
        request_id: RequestId,
    ) -> Result<SlotIndex> {
        for (index, mut slot) in self.store.iter() {
            if slot.is_busy() {
                continue;
            }
            directory.assign(request_id, index)?;
            slot.claim(request_id);
            debug!(request_id, slot = index, "acquired slot");
            return Ok(index);
        }

        let capacity = self.capacity();
        warn!(request_id, capacity, "no free slot");
        Err(Error::NoFreeSlot { capacity })
    }

    /// Release the slot owned by `request_id`.
    ///
    /// Returns `false` if the request owns no slot. Safe to call while a
    /// decode step for the request is in flight: the worker's next write
    /// fails with [`Error::NotOwner`].
    pub fn release(&self, request_id: RequestId) -> bool {
        let mut directory = self.directory.lock();

        let Some(index) = directory.lookup(request_id) else {
            return false;
        };
        if let Ok(mut slot) = self.store.get(index) {
            slot.vacate();
        }
        directory.release(index);
        debug!(request_id, slot = index, "released slot");
        true
    }

    /// Get the slot serving `request_id`.
    pub fn lookup(&self, request_id: RequestId) -> Option<SlotIndex> {
        self.directory.lookup(request_id)
    }

    /// Get the request served by `slot`.
    pub fn owner_of(&self, slot: SlotIndex) -> Option<RequestId> {
        self.directory.owner_of(slot)
    }

    /// Ask the worker driving `request_id` to stop after its current step.
    ///
    /// Returns `false` if the request owns no slot.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let directory = self.directory.lock();

        let Some(index) = directory.lookup(request_id) else {
            return false;
        };
        match self.store.get(index) {
            Ok(mut slot) => {
                slot.request_cancel();
                debug!(request_id, slot = index, "cancellation requested");
                true
            }
            Err(_) => false,
        }
    }

    // ========== Decode path ==========

    /// Attach a media buffer to the request's slot.
    pub fn attach_media(
        &self,
        index: SlotIndex,
        request_id: RequestId,
        media: MediaBuffer,
    ) -> Result<()> {
        let mut slot = self.owned_slot(index, request_id)?;
        slot.attach_media(media);
        Ok(())
    }

    /// Advance the slot position by `n_tokens` consumed prompt tokens.
    ///
    /// Returns the new position.
    pub fn advance_position(
        &self,
        index: SlotIndex,
        request_id: RequestId,
        n_tokens: usize,
    ) -> Result<usize> {
        let mut slot = self.owned_slot(index, request_id)?;
        slot.advance(n_tokens);
        Ok(slot.position())
    }

    /// Record a decoded token and check the stop pattern under the same lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwner`] if the request was released or the slot
    /// reassigned since the step started.
    pub fn record_token(
        &self,
        index: SlotIndex,
        request_id: RequestId,
        token: TokenId,
        piece: &str,
    ) -> Result<StepOutcome> {
        let mut slot = self.owned_slot(index, request_id)?;
        slot.record_token(token, piece);
        Ok(StepOutcome {
            position: slot.position(),
            stop_matched: slot.stop_matches(&self.stop_pattern),
            cancel_requested: slot.is_cancel_requested(),
        })
    }

    /// Check the cooperative cancellation flag between decode steps.
    pub fn is_cancelled(&self, index: SlotIndex, request_id: RequestId) -> Result<bool> {
        Ok(self.owned_slot(index, request_id)?.is_cancel_requested())
    }

    fn owned_slot(
        &self,
        index: SlotIndex,
        request_id: RequestId,
    ) -> Result<parking_lot::MutexGuard<'_, Slot>> {
        let slot = self.store.get(index)?;
        slot.ensure_owner(index, request_id)?;
        Ok(slot)
    }

    // ========== Monitoring ==========

    /// Check whether the slot's generated tokens end with the stop pattern.
    pub fn stop_matches(&self, index: SlotIndex) -> Result<bool> {
        Ok(self.store.get(index)?.stop_matches(&self.stop_pattern))
    }

    /// Run `f` against a slot under its lock.
    pub fn with_slot<R>(&self, index: SlotIndex, f: impl FnOnce(&Slot) -> R) -> Result<R> {
        let slot = self.store.get(index)?;
        Ok(f(&slot))
    }

    /// Get a slot's last produced token.
    pub fn last_token(&self, index: SlotIndex) -> Result<Option<TokenId>> {
        self.store.last_token(index)
    }

    /// Get a slot's context position.
    pub fn position(&self, index: SlotIndex) -> Result<usize> {
        self.store.position(index)
    }

    /// Check whether a slot is occupied.
    pub fn is_busy(&self, index: SlotIndex) -> Result<bool> {
        self.store.is_busy(index)
    }

    /// Get a copy of a slot's generated text.
    pub fn output(&self, index: SlotIndex) -> Result<String> {
        self.store.output(index)
    }

    /// Get a copy of a slot's generated tokens.
    pub fn output_tokens(&self, index: SlotIndex) -> Result<Vec<TokenId>> {
        self.store.output_tokens(index)
    }

    /// Snapshot a single slot.
    pub fn snapshot(&self, index: SlotIndex) -> Result<SlotSnapshot> {
        self.store.snapshot(index)
    }

    /// Snapshot every slot.
    pub fn snapshots(&self) -> Vec<SlotSnapshot> {
        self.store.snapshots()
    }

    /// Number of occupied slots.
    pub fn num_busy(&self) -> usize {
        self.store.num_busy()
    }

    /// Number of free slots.
    pub fn num_free(&self) -> usize {
        self.capacity() - self.num_busy()
    }
}
