//! Scripted decode backend.
//!
//! [`ReplayBackend`] stands in for a real decode engine: every slot replays
//! the same character script, one character per step. Token ids are Unicode
//! scalar values, and the backend doubles as the [`TokenEncoder`] so stop
//! patterns derived from it line up with what it generates.

use std::collections::HashMap;
use std::time::Duration;

use super::context::TokenEncoder;
use super::worker::{DecodeBackend, DecodedToken};
use crate::core::{MediaBuffer, SlotIndex, TokenId};
use crate::error::{Error, Result};

/// Context positions charged per attached media buffer by default.
pub const DEFAULT_MEDIA_POSITIONS: usize = 1;

/// Backend replaying a fixed character script.
///
/// # Example
///
/// ```
/// use nano_slots::engine::replay::ReplayBackend;
/// use nano_slots::engine::worker::DecodeBackend;
///
/// let mut backend = ReplayBackend::from_text("ab");
/// assert_eq!(backend.prefill(0, &[1, 2, 3], &[]).unwrap(), 3);
/// assert_eq!(backend.step(0, None, 3).unwrap().piece, "a");
/// assert_eq!(backend.step(0, None, 4).unwrap().piece, "b");
///
/// // Scripts end with an end-of-generation token
/// assert!(backend.step(0, None, 5).unwrap().end_of_generation);
/// ```
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    script: Vec<char>,
    /// Step index per slot, reset by `prefill`.
    cursors: HashMap<SlotIndex, usize>,
    /// Loop the script instead of ending generation.
    repeat: bool,
    media_positions: usize,
    step_delay: Option<Duration>,
}

impl ReplayBackend {
    /// Create a backend replaying `text` once.
    pub fn from_text(text: &str) -> Self {
        Self {
            script: text.chars().collect(),
            cursors: HashMap::new(),
            repeat: false,
            media_positions: DEFAULT_MEDIA_POSITIONS,
            step_delay: None,
        }
    }

    /// Loop the script forever; generation then ends only by stop pattern,
    /// token limit or cancellation.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Charge `positions` context positions per media buffer.
    pub fn with_media_positions(mut self, positions: usize) -> Self {
        self.media_positions = positions;
        self
    }

    /// Sleep for `delay` in every step to simulate model latency.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Token id for a character.
    pub fn token_of(c: char) -> TokenId {
        c as TokenId
    }
}

impl TokenEncoder for ReplayBackend {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text.chars().map(Self::token_of).collect())
    }
}

impl DecodeBackend for ReplayBackend {
    fn prefill(
        &mut self,
        slot: SlotIndex,
        prompt: &[TokenId],
        media: &[MediaBuffer],
    ) -> Result<usize> {
        self.cursors.insert(slot, 0);
        Ok(prompt.len() + media.len() * self.media_positions)
    }

    fn step(
        &mut self,
        slot: SlotIndex,
        _last_token: Option<TokenId>,
        _position: usize,
    ) -> Result<DecodedToken> {
        if self.script.is_empty() && self.repeat {
            return Err(Error::Decode("cannot repeat an empty script".to_string()));
        }
        if let Some(delay) = self.step_delay {
            std::thread::sleep(delay);
        }

        let cursor = self.cursors.entry(slot).or_insert(0);
        let index = *cursor;
        *cursor += 1;

        let next = if self.repeat {
            Some(self.script[index % self.script.len()])
        } else {
            self.script.get(index).copied()
        };
        Ok(match next {
            Some(c) => DecodedToken {
                token: Self::token_of(c),
                piece: c.to_string(),
                end_of_generation: false,
            },
            None => DecodedToken {
                token: 0,
                piece: String::new(),
                end_of_generation: true,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_steps() {
        let mut backend = ReplayBackend::from_text("ok");
        let tokens = backend.encode("ok").unwrap();
        backend.prefill(0, &[], &[]).unwrap();
        assert_eq!(backend.step(0, None, 0).unwrap().token, tokens[0]);
        assert_eq!(backend.step(0, None, 1).unwrap().token, tokens[1]);
    }

    #[test]
    fn test_slots_have_independent_cursors() {
        let mut backend = ReplayBackend::from_text("xyz");
        backend.prefill(0, &[], &[]).unwrap();
        backend.prefill(1, &[], &[]).unwrap();

        assert_eq!(backend.step(0, None, 0).unwrap().piece, "x");
        assert_eq!(backend.step(0, None, 1).unwrap().piece, "y");
        assert_eq!(backend.step(1, None, 0).unwrap().piece, "x");
    }

    #[test]
    fn test_prefill_resets_cursor() {
        let mut backend = ReplayBackend::from_text("ab");
        backend.prefill(0, &[], &[]).unwrap();
        backend.step(0, None, 0).unwrap();
        backend.prefill(0, &[], &[]).unwrap();
        assert_eq!(backend.step(0, None, 0).unwrap().piece, "a");
    }

    #[test]
    fn test_repeating() {
        let mut backend = ReplayBackend::from_text("ab").repeating();
        backend.prefill(0, &[], &[]).unwrap();
        let pieces: String = (0..5)
            .map(|i| backend.step(0, None, i).unwrap().piece)
            .collect();
        assert_eq!(pieces, "ababa");

        let mut empty = ReplayBackend::from_text("").repeating();
        assert!(matches!(empty.step(0, None, 0), Err(Error::Decode(_))));
    }

    #[test]
    fn test_media_positions() {
        let mut backend = ReplayBackend::from_text("a").with_media_positions(4);
        let image = MediaBuffer::image(None, 1, 1, vec![0, 0, 0]).unwrap();
        assert_eq!(backend.prefill(0, &[1, 2], &[image.clone(), image]).unwrap(), 10);
    }
}
