//! `xystage-core`
//!
//! Shared building blocks for the xystage motion controller drivers.
//!
//! ## Layers
//!
//! - **Transport** ([`serial::Transport`]): byte-level duplex channel with
//!   stale-input draining and deadline-bounded reads.
//! - **Drivers** (separate crates): the two-axis stage controller and the
//!   indexed wave-plate rotator, each speaking its own text protocol over a
//!   [`serial::Transport`].
//!
//! ## Key Types
//!
//! - [`StageError`]: error taxonomy shared by every driver
//! - [`Axis`]: the two linear stage axes
//! - [`ReadOutcome`]: complete vs. truncated reply bytes

pub mod axis;
pub mod error;
pub mod limits;
pub mod serial;

pub use axis::Axis;
pub use error::{StageError, StageResult};
pub use serial::{DynSerial, ReadOutcome, SerialPortIO, Transport};
