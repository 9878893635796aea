//! Logging setup
//!
//! Installs a `tracing-subscriber` registry with one formatting layer:
//! - Pretty, compact or JSON output
//! - `RUST_LOG` filtering, falling back to the configured level
//! - Idempotent: a second `init` is a no-op, which keeps tests and the CLI
//!   from fighting over the global dispatcher
//!
//! # Example
//! ```no_run
//! use xystage::{config::XyStageConfig, tracing_setup};
//!
//! let config = XyStageConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!(port = %config.stage.port, "Starting");
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::config::XyStageConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// Single line, no colour (long scans, redirected output)
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Fallback level when `RUST_LOG` is unset.
    pub level: Level,
    /// Line format.
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events (shows how long each homing pass took)
    pub with_span_events: bool,
    /// Include source file and line in each event.
    pub with_file_and_line: bool,
    /// Colour output (pretty format only).
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Defaults at the given level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level and format from the `[application]` section.
    pub fn from_config(config: &XyStageConfig) -> Result<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Choose the line format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span NEW/CLOSE events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Toggle colour output.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the loaded configuration.
pub fn init_from_config(config: &XyStageConfig) -> Result<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(config: TracingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line);

    let layer = match config.format {
        OutputFormat::Pretty => layer.pretty().with_ansi(config.with_ansi).with_filter(env_filter).boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(false).with_filter(env_filter).boxed(),
        OutputFormat::Json => layer.json().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // Already initialized (tests, repeated CLI setup): keep the first.
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(anyhow!("Failed to initialize tracing: {}", e))
            }
        })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn level_to_filter_string(level: Level) -> String {
    level.as_str().to_lowercase()
}
