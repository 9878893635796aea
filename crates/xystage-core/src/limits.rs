//! Shared hard limits and timing constants.
//!
//! This module centralizes:
//! - Stage safety bounds (absolute step targets)
//! - Default timeouts for command exchanges and motion waits
//! - Serial polling intervals

use std::time::Duration;

// =============================================================================
// Safety Bounds
// =============================================================================

/// Largest absolute X target in steps.
pub const X_MAX_STEPS: i64 = 7000;

/// Largest absolute Y target in steps.
pub const Y_MAX_STEPS: i64 = 4500;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default window for one command/reply exchange (2 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default window for a blocking motion to report idle (60 seconds).
pub const DEFAULT_MOTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between "is active" queries while waiting for motion to finish.
pub const DEFAULT_ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Serial Polling
// =============================================================================

/// Delay between read attempts when the port reports `WouldBlock`.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Total time spent discarding stale input before a command.
pub const STALE_DRAIN_WINDOW: Duration = Duration::from_millis(10);

/// Per-read wait while draining stale input.
pub const STALE_READ_SLICE: Duration = Duration::from_millis(2);

/// Default baud rate for both controller boards.
pub const DEFAULT_BAUD_RATE: u32 = 9600;
