//! Two-axis stepper stage driver for xystage
//!
//! This crate drives the X/Y positioning stage: a controller board with two
//! independently addressed stepper channels and a limit switch at the low end
//! of each axis.
//!
//! # Modules
//!
//! - [`protocol`] - Request encoding and `R`-line reply parsing
//! - [`status`] - Status register decoding
//! - [`controller`] - [`AxisController`] configuration and motion primitives
//! - `homing` - Three-pass limit-switch homing (`AxisController::find_home`)
//!
//! # Safety bounds
//!
//! Absolute targets above 7000 (X) or 4500 (Y) steps are rejected with
//! [`xystage_core::StageError::OutOfRange`] before any byte is written.

pub mod controller;
mod homing;
pub mod protocol;
pub mod status;

pub use controller::{AxisController, AxisControllerConfig, AxisState, HomingConfig, MotionProfile};
pub use homing::{X_LIMIT_MASK, Y_LIMIT_MASK};
pub use protocol::{encode_query_reply, parse_reply, Command, Opcode, StepMode};
pub use status::{decode_status_bits, StatusBits};
