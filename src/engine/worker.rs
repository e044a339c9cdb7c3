//! Per-request decode loop.
//!
//! A [`SlotWorker`] drives one completion request through its slot:
//!
//! ```text
//!   acquire ─► prefill ─► ┌─────────────────────────────┐ ─► release
//!                         │ cancelled?        → Aborted │
//!                         │ step (backend)              │
//!                         │ end of generation → EOS     │
//!                         │ record token                │
//!                         │ antiprompt        → Stop    │
//!                         │ max tokens        → Max     │
//!                         └─────────────────────────────┘
//! ```
//!
//! The slot is released on every exit path, including backend errors.
//! Cancellation is cooperative: flags are checked between steps, a step in
//! flight always completes.

use std::sync::Arc;

use tracing::debug;

use crate::config::GenerationConfig;
use crate::core::{MediaBuffer, RequestId, SlotIndex, TokenId};
use crate::error::{Error, Result};
use crate::scheduler::SlotScheduler;

/// Reason for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FinishReason {
    /// End-of-generation token produced.
    EndOfSequence,
    /// Maximum token limit reached.
    MaxTokens,
    /// Antiprompt encountered.
    StopSequence,
    /// Cancelled, or the slot was released from under the worker.
    Aborted,
}

/// Token produced by one decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub token: TokenId,
    /// Detokenized text for `token`.
    pub piece: String,
    /// The model signalled end of generation; `token` is not part of the output.
    pub end_of_generation: bool,
}

/// External decode engine advancing model state for a slot.
pub trait DecodeBackend {
    /// Reset the slot's cache and evaluate the prompt and media into it.
    ///
    /// Returns the number of context positions consumed.
    fn prefill(
        &mut self,
        slot: SlotIndex,
        prompt: &[TokenId],
        media: &[MediaBuffer],
    ) -> Result<usize>;

    /// Produce the next token for the slot.
    fn step(
        &mut self,
        slot: SlotIndex,
        last_token: Option<TokenId>,
        position: usize,
    ) -> Result<DecodedToken>;
}

/// A completion request as seen by the worker.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub request_id: RequestId,
    /// Tokenized prompt.
    pub prompt: Vec<TokenId>,
    /// Media referenced by the prompt, in marker order.
    pub media: Vec<MediaBuffer>,
    pub config: GenerationConfig,
}

impl CompletionRequest {
    /// Create a request with default generation limits.
    pub fn new(request_id: RequestId, prompt: Vec<TokenId>) -> Self {
        Self {
            request_id,
            prompt,
            media: Vec::new(),
            config: GenerationConfig::default(),
        }
    }

    /// Set the maximum tokens to generate.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Attach a media buffer.
    pub fn media(mut self, media: MediaBuffer) -> Self {
        self.media.push(media);
        self
    }
}

/// Finished completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub request_id: RequestId,
    /// Slot that served the request.
    pub slot: SlotIndex,
    /// Generated text.
    pub text: String,
    /// Generated tokens.
    pub tokens: Vec<TokenId>,
    /// Context positions consumed by the prompt.
    pub prompt_positions: usize,
    pub finish_reason: FinishReason,
}

/// Drives completion requests through the shared scheduler.
pub struct SlotWorker<B> {
    scheduler: Arc<SlotScheduler>,
    backend: B,
}

impl<B: DecodeBackend> SlotWorker<B> {
    /// Create a worker over `scheduler` using `backend` for decode steps.
    pub fn new(scheduler: Arc<SlotScheduler>, backend: B) -> Self {
        Self { scheduler, backend }
    }

    /// Get the decode backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run a request to completion.
    ///
    /// # Errors
    ///
    /// - [`Error::NoFreeSlot`] if the pool is exhausted; nothing was
    ///   started and the request may be retried.
    /// - [`Error::Conflict`] if `request_id` already owns a slot; that slot
    ///   is left untouched.
    /// - Any backend error; the slot has been released.
    pub fn run(&mut self, request: CompletionRequest) -> Result<Completion> {
        let request_id = request.request_id;
        let slot = self.scheduler.acquire_new(request_id)?;

        let result = self.drive(slot, request);
        self.scheduler.release(request_id);

        if let Ok(completion) = &result {
            debug!(
                request_id,
                slot,
                tokens = completion.tokens.len(),
                finish_reason = ?completion.finish_reason,
                "completion finished"
            );
        }
        result
    }

    fn drive(&mut self, slot: SlotIndex, request: CompletionRequest) -> Result<Completion> {
        let CompletionRequest {
            request_id,
            prompt,
            media,
            config,
        } = request;

        let prompt_positions = self.backend.prefill(slot, &prompt, &media)?;
        let mut completion = Completion {
            request_id,
            slot,
            text: String::new(),
            tokens: Vec::new(),
            prompt_positions,
            finish_reason: FinishReason::Aborted,
        };

        let prepared = self
            .scheduler
            .advance_position(slot, request_id, prompt_positions)
            .and_then(|_| {
                media
                    .into_iter()
                    .try_for_each(|m| self.scheduler.attach_media(slot, request_id, m))
            });
        match prepared {
            Ok(()) => {}
            Err(Error::NotOwner { .. }) => return Ok(completion),
            Err(e) => return Err(e),
        }

        let mut position = prompt_positions;
        let mut last_token = None;
        let finish_reason = loop {
            if completion.tokens.len() >= config.max_tokens {
                break FinishReason::MaxTokens;
            }
            match self.scheduler.is_cancelled(slot, request_id) {
                Ok(false) => {}
                Ok(true) | Err(Error::NotOwner { .. }) => break FinishReason::Aborted,
                Err(e) => return Err(e),
            }

            let decoded = self.backend.step(slot, last_token, position)?;
            if decoded.end_of_generation {
                break FinishReason::EndOfSequence;
            }

            let outcome =
                match self
                    .scheduler
                    .record_token(slot, request_id, decoded.token, &decoded.piece)
                {
                    Ok(outcome) => outcome,
                    Err(Error::NotOwner { .. }) => break FinishReason::Aborted,
                    Err(e) => return Err(e),
                };
            completion.tokens.push(decoded.token);
            completion.text.push_str(&decoded.piece);
            last_token = Some(decoded.token);
            position = outcome.position;

            if outcome.stop_matched {
                break FinishReason::StopSequence;
            }
            if outcome.cancel_requested {
                break FinishReason::Aborted;
            }
        };

        completion.finish_reason = finish_reason;
        Ok(completion)
    }
}
