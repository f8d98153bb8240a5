//! Process-wide `tracing` setup.
//!
//! Call [`init`] once at startup, before the storage is opened, so backend
//! open and migration events are captured. `RUST_LOG` overrides the default
//! directive.

use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;
use typed_builder::TypedBuilder;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log directive: {0}")]
    InvalidDirective(String),
    #[error("a global subscriber is already installed")]
    AlreadyInitialised,
    #[error("failed to install the log bridge: {0}")]
    LogBridge(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct TelemetryConfig {
    #[builder(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set, e.g. `info` or `snip_storage=debug`.
    #[builder(default = "info".to_string(), setter(into))]
    pub default_directive: String,
    #[builder(default = true)]
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.default_directive)
        .map_err(|e| TelemetryError::InvalidDirective(format!("{}: {e}", config.default_directive)))
}

/// Installs the global subscriber and the `log` bridge.
///
/// Fails with [`TelemetryError::AlreadyInitialised`] on a second call.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(builder.with_ansi(config.ansi).finish())
        }
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.json().with_ansi(false).finish())
        }
    };
    installed.map_err(|_| TelemetryError::AlreadyInitialised)?;

    // sqlx reports through `log`.
    LogTracer::init().map_err(|e| TelemetryError::LogBridge(e.to_string()))
}
