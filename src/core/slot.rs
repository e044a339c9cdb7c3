//! Per-slot generation state.
//!
//! A [`Slot`] holds the decoding state of one concurrently active
//! generation line. Slots are created once for the full capacity and reused
//! in place: claiming a slot resets its fields, vacating it drops the media
//! buffers and the owner.

use serde::Serialize;

use super::media::MediaBuffer;
use super::stop::StopPattern;
use super::{RequestId, SlotIndex, TokenId};
use crate::error::{Error, Result};

/// Mutable state of a single sequence slot.
///
/// # Example
///
/// ```
/// use nano_slots::core::slot::Slot;
///
/// let slot = Slot::default();
/// assert!(!slot.is_busy());
/// assert_eq!(slot.position(), 0);
/// assert_eq!(slot.last_token(), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Slot {
    /// Most recently produced token, `None` until the first decode step.
    last_token: Option<TokenId>,
    /// Tokens consumed into this slot's context window.
    position: usize,
    /// True while a request owns the slot.
    busy: bool,
    /// Request currently owning the slot.
    owner: Option<RequestId>,
    /// Cooperative cancellation flag, checked between decode steps.
    cancel_requested: bool,
    /// Text generated so far.
    output: String,
    /// Tokens generated so far.
    output_tokens: Vec<TokenId>,
    /// Multimodal inputs attached to the current request.
    media: Vec<MediaBuffer>,
}

impl Slot {
    // ========== Getters ==========

    /// Get the last produced token.
    pub fn last_token(&self) -> Option<TokenId> {
        self.last_token
    }

    /// Get the number of tokens consumed into the context window.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check whether a request owns this slot.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Get the owning request.
    pub fn owner(&self) -> Option<RequestId> {
        self.owner
    }

    /// Check whether cancellation was requested for the current owner.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Get the text generated so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Get the tokens generated so far.
    pub fn output_tokens(&self) -> &[TokenId] {
        &self.output_tokens
    }

    /// Get the attached media buffers, in attachment order.
    pub fn media(&self) -> &[MediaBuffer] {
        &self.media
    }

    /// Check whether the generated tokens end with `pattern`.
    pub fn stop_matches(&self, pattern: &StopPattern) -> bool {
        pattern.matches(&self.output_tokens)
    }

    // ========== Occupancy ==========

    /// Mark the slot busy for `request_id` and reset all generation state.
    pub(crate) fn claim(&mut self, request_id: RequestId) {
        self.last_token = None;
        self.position = 0;
        self.busy = true;
        self.owner = Some(request_id);
        self.cancel_requested = false;
        self.output.clear();
        self.output_tokens.clear();
        self.media.clear();
    }

    /// Mark the slot idle. Media buffers are dropped here; the rest of the
    /// state stays readable until the next claim.
    pub(crate) fn vacate(&mut self) {
        self.busy = false;
        self.owner = None;
        self.cancel_requested = false;
        self.media.clear();
    }

    // ========== Owner writes ==========

    /// Fail unless `request_id` currently owns this slot.
    pub(crate) fn ensure_owner(&self, index: SlotIndex, request_id: RequestId) -> Result<()> {
        if self.busy && self.owner == Some(request_id) {
            Ok(())
        } else {
            Err(Error::NotOwner {
                request_id,
                slot: index,
            })
        }
    }

    pub(crate) fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub(crate) fn attach_media(&mut self, media: MediaBuffer) {
        self.media.push(media);
    }

    pub(crate) fn advance(&mut self, n_tokens: usize) {
        self.position = self.position.saturating_add(n_tokens);
    }

    /// Append a decoded token and its text piece.
    pub(crate) fn record_token(&mut self, token: TokenId, piece: &str) {
        self.last_token = Some(token);
        self.position = self.position.saturating_add(1);
        self.output_tokens.push(token);
        self.output.push_str(piece);
    }

    /// Capture a serializable view of this slot.
    pub fn snapshot(&self, index: SlotIndex) -> SlotSnapshot {
        SlotSnapshot {
            slot: index,
            busy: self.busy,
            owner: self.owner,
            last_token: self.last_token,
            position: self.position,
            output_tokens: self.output_tokens.len(),
            media: self.media.len(),
            cancel_requested: self.cancel_requested,
        }
    }
}

/// Point-in-time view of a slot for monitoring and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub slot: SlotIndex,
    pub busy: bool,
    pub owner: Option<RequestId>,
    pub last_token: Option<TokenId>,
    pub position: usize,
    pub output_tokens: usize,
    pub media: usize,
    pub cancel_requested: bool,
}
