//! Error taxonomy for the stage and rotator drivers.
//!
//! `StageError` separates failures by where they happen relative to the wire:
//!
//! - **Before any I/O**: `InvalidArgument` and `OutOfRange`. The hardware has
//!   not been touched, so the caller can fix the value and call again.
//! - **After I/O**: `Protocol` (bytes arrived but did not parse) and `Timeout`
//!   (nothing usable arrived, or a motion never finished). Hardware state is
//!   unspecified afterwards; re-query position/status before resuming.
//! - **Setup**: `Connection` when the port cannot be opened.
//! - **Homing**: `HomingFailed` when a search exceeds its iteration cap.
//!
//! Drivers never retry. Callers pattern-match on the variant (or use
//! [`StageError::is_transient`] / [`StageError::requires_rehome`]) to decide
//! between re-sending, re-homing and aborting.

use crate::axis::Axis;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for driver results.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Primary error type for the xystage drivers.
#[derive(Error, Debug)]
pub enum StageError {
    /// The serial port could not be opened.
    #[error("Failed to open serial port '{port}': {message}")]
    Connection {
        /// Port path as given.
        port: String,
        /// Reason reported by the OS or the serial layer.
        message: String,
    },

    /// A reply arrived but could not be parsed into the expected shape.
    #[error("Malformed reply: {reason} (raw: {raw:?})")]
    Protocol {
        /// What did not match.
        reason: String,
        /// Reply text as received.
        raw: String,
    },

    /// No usable reply, or motion did not complete, within the allotted window.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Exchange or wait that ran out of time.
        operation: String,
        /// Window that elapsed.
        timeout: Duration,
    },

    /// A caller-supplied value was rejected before any I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A motion target violates the hard-coded stage safety bounds.
    #[error("Axis {axis} target {target} exceeds safety bound {max}")]
    OutOfRange {
        /// Axis the move was for.
        axis: Axis,
        /// Requested absolute target.
        target: i64,
        /// Largest allowed target on that axis.
        max: i64,
    },

    /// A homing search did not find its switch within the iteration cap.
    #[error("Homing failed: {0}")]
    HomingFailed(String),

    /// Underlying I/O failure on the open transport.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageError {
    /// Build a [`StageError::Protocol`] from a reason and the raw reply text.
    pub fn protocol(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Build a [`StageError::Timeout`] for the named operation.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// True when re-sending the same exchange is a reasonable recovery.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True when the position reference can no longer be trusted.
    pub fn requires_rehome(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::HomingFailed(_))
    }

    /// True for errors raised before anything was written to the port.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::OutOfRange { .. })
    }
}
