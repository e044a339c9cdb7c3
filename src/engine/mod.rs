//! Inference glue around the slot scheduler.
//!
//! This module contains:
//! - SlotContext for one-time startup
//! - SlotWorker for driving a request through its slot
//! - ReplayBackend, a scripted decode backend

pub mod context;
pub mod replay;
pub mod worker;

pub use context::{SlotContext, TokenEncoder};
pub use replay::ReplayBackend;
pub use worker::{
    Completion, CompletionRequest, DecodeBackend, DecodedToken, FinishReason, SlotWorker,
};
