//! # xystage
//!
//! Control library for a two-axis stepper positioning stage and a
//! half-wave-plate rotator, plus the caller-side pieces built on top of the
//! drivers.
//!
//! ## Crate Structure
//!
//! The drivers live in workspace crates and are re-exported here:
//!
//! - **`xystage-core`**: `StageError`, `Axis`, the serial `Transport` and
//!   shared limits.
//! - **`xystage-driver-axis`**: `AxisController`, its wire codec, status
//!   decoding and limit-switch homing.
//! - **`xystage-driver-rotator`**: `IndexedRotator` and its codec.
//! - **`xystage-driver-mock`**: simulated boards used by tests and `--mock`.
//!
//! This crate adds:
//!
//! - **`config`**: Figment-based configuration (`config/xystage.toml` plus
//!   `XYSTAGE_` environment variables).
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//! - **`recovery`**: `RetryPolicy`, retrying only transient failures.
//! - **`scan`**: serpentine raster scans with pluggable detectors and sinks.

pub mod config;
pub mod recovery;
pub mod scan;
pub mod tracing_setup;

pub use xystage_core::{Axis, ReadOutcome, StageError, StageResult, Transport};
pub use xystage_driver_axis::{
    AxisController, AxisControllerConfig, AxisState, MotionProfile, StatusBits,
};
pub use xystage_driver_rotator::{IndexedRotator, RotatorConfig, RotatorState};
