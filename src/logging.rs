//! Logging setup.
//!
//! Set `NANO_SLOTS_LOG_FORMAT=json` for JSON logs.
//! Set `RUST_LOG` to control log levels (default: info).

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log format mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed human-readable logs (default).
    Pretty,
    /// JSON-formatted logs.
    Json,
}

impl LogFormat {
    /// Detect log format from `NANO_SLOTS_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("NANO_SLOTS_LOG_FORMAT").unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the logging subsystem.
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this twice
/// is a no-op.
pub fn init(level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
    };
}
