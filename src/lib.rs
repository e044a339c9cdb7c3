//! nano-slots: a sequence-slot scheduler for concurrent LLM completions.
//!
//! Many completion requests share a small, fixed pool of decoding slots
//! backed by one model and KV cache. This crate provides:
//! - A fixed arena of per-slot generation state
//! - A request -> slot directory with O(1) release by slot
//! - Lowest-free-index allocation that fails fast when the pool is full
//! - Antiprompt (stop pattern) detection on generated tokens
//! - A worker loop tying the scheduler to an external decode backend

pub mod config;
pub mod error;
pub mod logging;

pub mod core;
pub mod engine;
pub mod scheduler;

pub use config::{ContextConfig, GenerationConfig};
pub use crate::core::{MediaBuffer, RequestId, SlotIndex, SlotSnapshot, StopPattern, TokenId};
pub use engine::{
    Completion, CompletionRequest, DecodeBackend, FinishReason, ReplayBackend, SlotContext,
    SlotWorker, TokenEncoder,
};
pub use error::{Error, Result};
pub use scheduler::{SlotScheduler, StepOutcome};
