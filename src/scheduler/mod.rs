//! Sequence slot scheduling.
//!
//! This module handles:
//! - Lowest-free-index slot allocation
//! - Idempotent acquire and release per request
//! - Owner-checked writes from the decode path

pub mod allocator;

pub use allocator::{SlotScheduler, StepOutcome};
