//! Configuration types for nano-slots.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default placeholder marking where media is spliced into a prompt.
pub const DEFAULT_MEDIA_MARKER: &str = "<__media__>";

/// Context configuration handed to the bootstrapper.
///
/// Mirrors the launch parameters of the inference server: how many
/// sequences the KV cache was sized for and how many of them are held back
/// for cache use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Total number of sequences the KV cache was sized for.
    pub n_seq_max: usize,
    /// Sequences reserved for cache use, not handed out to requests.
    pub cache_seq: usize,
    /// Logical batch size for the decode engine.
    pub n_batch: usize,
    /// Threads used by the decode engine and the vision encoder.
    pub n_threads: usize,
    /// Usable context window per sequence.
    pub n_usage_context: usize,
    /// Explicit chat template name (overrides the model's own template).
    pub chat_template: Option<String>,
    /// Placeholder marking media positions in prompts.
    pub media_marker: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            n_seq_max: 4,
            cache_seq: 0,
            n_batch: 512,
            n_threads: 1,
            n_usage_context: 4096,
            chat_template: None,
            media_marker: DEFAULT_MEDIA_MARKER.to_string(),
        }
    }
}

impl ContextConfig {
    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of slots available to requests.
    pub fn slot_capacity(&self) -> usize {
        self.n_seq_max.saturating_sub(self.cache_seq)
    }

    /// Check the configuration for values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the reserved cache sequences leave no
    /// slot for requests, or if a size field is zero.
    pub fn validate(&self) -> Result<()> {
        if self.cache_seq >= self.n_seq_max {
            return Err(Error::Config(format!(
                "cache_seq ({}) must be smaller than n_seq_max ({})",
                self.cache_seq, self.n_seq_max
            )));
        }
        if self.n_batch == 0 {
            return Err(Error::Config("n_batch must be positive".to_string()));
        }
        if self.n_threads == 0 {
            return Err(Error::Config("n_threads must be positive".to_string()));
        }
        if self.media_marker.is_empty() {
            return Err(Error::Config("media_marker must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Per-request generation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_tokens: 256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ContextConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slot_capacity(), 4);
    }

    #[test]
    fn test_cache_seq_reduces_capacity() {
        let config = ContextConfig {
            n_seq_max: 8,
            cache_seq: 3,
            ..Default::default()
        };
        assert_eq!(config.slot_capacity(), 5);
    }

    #[test]
    fn test_cache_seq_must_leave_a_slot() {
        let config = ContextConfig {
            n_seq_max: 2,
            cache_seq: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"n_seq_max": 16, "chat_template": "vicuna"}"#).unwrap();
        assert_eq!(config.n_seq_max, 16);
        assert_eq!(config.cache_seq, 0);
        assert_eq!(config.chat_template.as_deref(), Some("vicuna"));
        assert_eq!(config.media_marker, DEFAULT_MEDIA_MARKER);
    }
}
