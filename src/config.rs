//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/xystage.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `XYSTAGE_`, where `__` separates
//!    nested keys (e.g. `XYSTAGE_STAGE__PORT=/dev/ttyUSB0`)
//!
//! Every field has a default, so a missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use xystage::config::XyStageConfig;
//!
//! let config = XyStageConfig::load()?;
//! config.validate()?;
//! println!("Stage on {}", config.stage.port);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use xystage_core::limits::DEFAULT_BAUD_RATE;
use xystage_driver_axis::{AxisControllerConfig, StepMode};
use xystage_driver_rotator::RotatorConfig;

use crate::recovery::RetryPolicy;
use crate::tracing_setup::OutputFormat;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/xystage.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "XYSTAGE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct XyStageConfig {
    /// Logging.
    pub application: ApplicationConfig,
    /// Linear stage.
    pub stage: StageConfig,
    /// Wave-plate rotator.
    pub rotator: RotatorSection,
    /// Raster scans.
    pub scan: ScanConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Linear stage link and controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Serial port of the stage board.
    pub port: String,
    /// Stage link speed.
    pub baud_rate: u32,
    /// Timeouts, motion profile and homing, at the top level of `[stage]`.
    #[serde(flatten)]
    pub controller: AxisControllerConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            port: default_stage_port().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            controller: AxisControllerConfig::default(),
        }
    }
}

/// Wave-plate rotator link and driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorSection {
    /// Serial port of the rotator board.
    pub port: String,
    /// Rotator link speed.
    pub baud_rate: u32,
    /// Driver settings, at the top level of `[rotator]`.
    #[serde(flatten)]
    pub driver: RotatorConfig,
}

impl Default for RotatorSection {
    fn default() -> Self {
        Self {
            port: default_rotator_port().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            driver: RotatorConfig::default(),
        }
    }
}

/// Raster scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pause after each move before measuring
    pub settle_time_ms: u64,
    /// CSV output file
    pub output: PathBuf,
    /// Extra attempts for a stage move that timed out
    pub retry_attempts: u32,
    /// Pause between retry attempts
    pub retry_backoff_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_time_ms: 300,
            output: PathBuf::from("scan.csv"),
            retry_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl ScanConfig {
    /// [`settle_time_ms`](Self::settle_time_ms) as a `Duration`.
    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_time_ms)
    }

    /// Retry policy for stage moves during a scan.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            backoff_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[cfg(windows)]
fn default_stage_port() -> &'static str {
    "COM6"
}

#[cfg(not(windows))]
fn default_stage_port() -> &'static str {
    "/dev/ttyACM1"
}

#[cfg(windows)]
fn default_rotator_port() -> &'static str {
    "COM7"
}

#[cfg(not(windows))]
fn default_rotator_port() -> &'static str {
    "/dev/ttyACM0"
}

impl XyStageConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults fill every gap.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::figment(path.as_ref())
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.as_ref().display()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            bail!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            );
        }

        StepMode::from_microsteps(self.stage.controller.profile.microsteps)
            .context("Invalid stage.profile.microsteps")?;

        for (name, baud) in [
            ("stage.baud_rate", self.stage.baud_rate),
            ("rotator.baud_rate", self.rotator.baud_rate),
        ] {
            if baud == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        for (name, value) in [
            ("stage.command_timeout_ms", self.stage.controller.command_timeout_ms),
            ("stage.motion_timeout_ms", self.stage.controller.motion_timeout_ms),
            ("rotator.command_timeout_ms", self.rotator.driver.command_timeout_ms),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }

        if self.stage.controller.homing.max_travel_steps <= 0 {
            bail!("stage.homing.max_travel_steps must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = XyStageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stage.baud_rate, 9600);
        assert_eq!(config.stage.controller.profile.microsteps, 2);
        assert_eq!(config.rotator.driver.home_search_limit, 2000);
        #[cfg(not(windows))]
        {
            assert_eq!(config.stage.port, "/dev/ttyACM1");
            assert_eq!(config.rotator.port, "/dev/ttyACM0");
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = XyStageConfig::load_from("does/not/exist.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.scan.settle_time(), Duration::from_millis(300));
            Ok(())
        });
    }

    #[test]
    fn test_load_nested_sections() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "xystage.toml",
                r#"
[application]
log_level = "debug"
log_format = "json"

[stage]
port = "/dev/ttyUSB7"
command_timeout_ms = 500

[stage.profile]
max_speed = 250
microsteps = 8

[stage.homing]
max_travel_steps = 4000

[rotator]
home_search_limit = 432

[scan]
output = "out/map.csv"
"#,
            )?;

            let config = XyStageConfig::load_from("xystage.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert!(config.validate().is_ok());
            assert_eq!(config.application.log_format, OutputFormat::Json);
            assert_eq!(config.stage.port, "/dev/ttyUSB7");
            assert_eq!(config.stage.controller.command_timeout_ms, 500);
            assert_eq!(config.stage.controller.motion_timeout_ms, 60_000);
            assert_eq!(config.stage.controller.profile.max_speed, 250);
            assert_eq!(config.stage.controller.profile.min_speed, 30);
            assert_eq!(config.stage.controller.homing.max_travel_steps, 4000);
            assert_eq!(config.rotator.driver.home_search_limit, 432);
            assert_eq!(config.scan.output, PathBuf::from("out/map.csv"));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("xystage.toml", "[stage]\nport = \"/dev/ttyACM9\"\n")?;
            jail.set_env("XYSTAGE_STAGE__PORT", "/dev/ttyUSB0");
            jail.set_env("XYSTAGE_STAGE__PROFILE__MICROSTEPS", "16");

            let config = XyStageConfig::load_from("xystage.toml")
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.stage.port, "/dev/ttyUSB0");
            assert_eq!(config.stage.controller.profile.microsteps, 16);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = XyStageConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = XyStageConfig::default();
        config.stage.controller.profile.microsteps = 3;
        assert!(config.validate().is_err());

        let mut config = XyStageConfig::default();
        config.rotator.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = XyStageConfig::default();
        config.stage.controller.motion_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
