//! # Log Subscriber Setup
//!
//! The protocol only emits through `tracing` macros. Hosts that want the
//! output call [`init_logging`] once with a [`LogSettings`], usually built
//! from `KEEL_LOG` / `KEEL_LOG_FORMAT`.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ProtocolError, ProtocolResult};

/// Environment variable holding an `EnvFilter` directive string.
pub const LOG_FILTER_ENV: &str = "KEEL_LOG";
/// Environment variable selecting `pretty` or `json` output.
pub const LOG_FORMAT_ENV: &str = "KEEL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

impl FromStr for LogFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ProtocolError::invalid_value(format!("unknown log format {other:?}"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives, e.g. `keel_protocol=debug,warn`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::new("keel_protocol=info,keel_adapters=info,warn")
    }
}

impl LogSettings {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            format: LogFormat::default(),
        }
    }

    /// Applies `KEEL_LOG` and `KEEL_LOG_FORMAT` where set.
    pub fn with_env_overrides(self) -> ProtocolResult<Self> {
        self.with_overrides(
            std::env::var(LOG_FILTER_ENV).ok(),
            std::env::var(LOG_FORMAT_ENV).ok(),
        )
    }

    fn with_overrides(mut self, filter: Option<String>, format: Option<String>) -> ProtocolResult<Self> {
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            self.filter = filter;
        }
        if let Some(format) = format {
            self.format = format.parse()?;
        }
        Ok(self)
    }

    fn env_filter(&self) -> ProtocolResult<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| ProtocolError::invalid_value(format!("log filter {:?}: {e}", self.filter)))
    }
}

/// Installs the global subscriber. Fails on a malformed filter or when a
/// subscriber is already in place.
pub fn init_logging(settings: &LogSettings) -> ProtocolResult<()> {
    let filter = settings.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match settings.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false),
            )
            .try_init(),
    };
    installed.map_err(|e| ProtocolError::invalid_value(format!("log subscriber: {e}")))?;
    tracing::info!(filter = %settings.filter, format = %settings.format, "logging initialized");
    Ok(())
}

/// Captured by the test harness; a no-op once anything is installed.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
