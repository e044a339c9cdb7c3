//! Antiprompt (stop pattern) detection.
//!
//! Legacy chat templates have no explicit end-of-turn token; generation is
//! stopped when the model starts writing the next turn's label instead.
//! The label is tokenized once at startup into a [`StopPattern`] and
//! compared against the tail of each slot's generated tokens.

use super::TokenId;

/// Check whether `tokens` ends with `pattern`, elementwise.
///
/// An empty pattern never matches.
///
/// # Example
///
/// ```
/// use nano_slots::core::stop::stop_matches;
///
/// assert!(stop_matches(&[1, 2, 7, 8], &[7, 8]));
/// assert!(!stop_matches(&[7, 8, 1], &[7, 8]));
/// assert!(!stop_matches(&[8], &[7, 8]));
/// assert!(!stop_matches(&[], &[]));
/// ```
pub fn stop_matches(tokens: &[TokenId], pattern: &[TokenId]) -> bool {
    !pattern.is_empty() && tokens.ends_with(pattern)
}

/// Fixed trailing token sequence that ends a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopPattern {
    tokens: Vec<TokenId>,
}

impl StopPattern {
    /// Create a stop pattern from tokens.
    pub fn new(tokens: Vec<TokenId>) -> Self {
        Self { tokens }
    }

    /// A pattern that never matches.
    pub fn none() -> Self {
        Self::default()
    }

    /// Get the pattern tokens.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Check whether no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of tokens in the pattern.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check whether `tokens` ends with this pattern.
    pub fn matches(&self, tokens: &[TokenId]) -> bool {
        stop_matches(tokens, &self.tokens)
    }
}

impl From<Vec<TokenId>> for StopPattern {
    fn from(tokens: Vec<TokenId>) -> Self {
        Self::new(tokens)
    }
}
