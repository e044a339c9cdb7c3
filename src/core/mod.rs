//! Core infrastructure for nano-slots.
//!
//! This module contains the building blocks of the slot scheduler:
//! - Slot and SlotStore for per-sequence generation state
//! - Directory for the request -> slot mapping
//! - StopPattern for antiprompt detection
//! - MediaBuffer for multimodal inputs attached to a slot

pub mod directory;
pub mod media;
pub mod slot;
pub mod slot_store;
pub mod stop;

/// External identifier of a completion request.
pub type RequestId = u64;

/// Index of a sequence slot in `[0, capacity)`.
pub type SlotIndex = usize;

/// Token identifier produced by the tokenizer.
pub type TokenId = u32;

pub use directory::Directory;
pub use media::MediaBuffer;
pub use slot::{Slot, SlotSnapshot};
pub use slot_store::SlotStore;
pub use stop::{stop_matches, StopPattern};
