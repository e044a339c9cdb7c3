//! Context bootstrapping.
//!
//! [`SlotContext`] is built once at startup. It validates the launch
//! configuration, resolves the chat template, derives the legacy stop
//! pattern and hands a shared [`SlotScheduler`] to request handlers.
//!
//! ## Stop patterns
//!
//! | Template   | Antiprompt    |
//! |------------|---------------|
//! | `vicuna`   | `ASSISTANT:`  |
//! | `deepseek` | `###`         |
//! | otherwise  | none          |

use std::path::Path;
use std::sync::Arc;

use tokenizers::Tokenizer;
use tracing::info;

use crate::config::ContextConfig;
use crate::core::{StopPattern, TokenId};
use crate::error::{Error, Result};
use crate::scheduler::SlotScheduler;

/// Text encoder used to tokenize the antiprompt.
pub trait TokenEncoder {
    /// Encode `text` without adding BOS/EOS.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;
}

impl TokenEncoder for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = (**self)
            .encode(text, false)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

/// Antiprompt text for templates without end-of-turn markup.
pub fn legacy_antiprompt(chat_template: &str) -> Option<&'static str> {
    match chat_template {
        "vicuna" => Some("ASSISTANT:"),
        "deepseek" => Some("###"),
        _ => None,
    }
}

/// Tokenize the antiprompt of `chat_template`, if it has one.
pub fn derive_stop_pattern(
    chat_template: Option<&str>,
    encoder: &dyn TokenEncoder,
) -> Result<StopPattern> {
    match chat_template.and_then(legacy_antiprompt) {
        Some(text) => Ok(StopPattern::new(encoder.encode(text)?)),
        None => Ok(StopPattern::none()),
    }
}

/// Startup state shared by all request handlers.
#[derive(Debug, Clone)]
pub struct SlotContext {
    config: ContextConfig,
    /// Resolved chat template (explicit name, or the model's embedded one).
    chat_template: String,
    scheduler: Arc<SlotScheduler>,
}

impl SlotContext {
    /// Build the context.
    ///
    /// # Arguments
    ///
    /// * `config` - Launch configuration
    /// * `encoder` - Tokenizer used for the antiprompt
    /// * `model_template` - Chat template embedded in the model, if any
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid.
    /// - [`Error::MissingChatTemplate`] if neither the model nor the
    ///   configuration provide a chat template.
    pub fn bootstrap(
        config: ContextConfig,
        encoder: &dyn TokenEncoder,
        model_template: Option<&str>,
    ) -> Result<Self> {
        config.validate()?;

        let chat_template = config
            .chat_template
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| model_template.map(str::to_string))
            .ok_or(Error::MissingChatTemplate)?;

        // Only an explicitly named template selects a legacy antiprompt.
        let stop_pattern = derive_stop_pattern(config.chat_template.as_deref(), encoder)?;

        let capacity = config.slot_capacity();
        info!(
            n_seq_max = config.n_seq_max,
            cache_seq = config.cache_seq,
            capacity,
            stop_tokens = stop_pattern.len(),
            "slot context ready"
        );

        Ok(Self {
            scheduler: Arc::new(SlotScheduler::new(capacity, stop_pattern)),
            chat_template,
            config,
        })
    }

    /// Build the context with a `tokenizer.json` from disk.
    pub fn from_tokenizer_file(
        config: ContextConfig,
        tokenizer_path: impl AsRef<Path>,
        model_template: Option<&str>,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        Self::bootstrap(config, &tokenizer, model_template)
    }

    /// Get a handle to the shared scheduler.
    pub fn scheduler(&self) -> Arc<SlotScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Get the launch configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Get the resolved chat template.
    pub fn chat_template(&self) -> &str {
        &self.chat_template
    }

    /// Get the stop pattern derived from the template.
    pub fn stop_pattern(&self) -> &StopPattern {
        self.scheduler.stop_pattern()
    }

    /// Slots available to requests.
    pub fn n_seq_max(&self) -> usize {
        self.scheduler.capacity()
    }

    /// Sequences reserved for cache use.
    pub fn kv_cache_seq(&self) -> usize {
        self.config.cache_seq
    }

    /// Maximum tokens per decode batch.
    pub fn n_batch(&self) -> usize {
        self.config.n_batch
    }

    /// Threads used for decoding.
    pub fn n_threads(&self) -> usize {
        self.config.n_threads
    }

    /// Context length available to each request.
    pub fn n_usage_context(&self) -> usize {
        self.config.n_usage_context
    }

    /// Placeholder marking media positions in prompts.
    pub fn media_marker(&self) -> &str {
        &self.config.media_marker
    }
}
