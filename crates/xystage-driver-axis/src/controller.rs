//! Two-axis stage controller.
//!
//! # Protocol
//!
//! - Transport: 9600 baud, 8N1, DTR held low
//! - Request: `C<code> <axis>[ <value>]\n`
//! - Reply: optional `R <value>` line, then the `>` prompt
//!
//! Every exchange drains stale input first, so a reply that arrived after an
//! earlier timeout is never mistaken for the answer to the current command.
//!
//! # Example
//!
//! ```rust,ignore
//! use xystage_driver_axis::{AxisController, AxisControllerConfig};
//!
//! let mut stage = AxisController::open("/dev/ttyACM1", 9600, AxisControllerConfig::default()).await?;
//! stage.initialize(stage.config().profile).await?;
//! stage.find_home().await?;
//! stage.go_to_position(1500, 800, true).await?;
//! ```

use crate::protocol::{is_reply_complete, parse_reply, Command, Opcode, StepMode};
use crate::status::{decode_status_bits, StatusBits};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;
use xystage_core::limits::{
    DEFAULT_ACTIVE_POLL_INTERVAL, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MOTION_TIMEOUT,
};
use xystage_core::{Axis, ReadOutcome, StageError, StageResult, Transport};

// =============================================================================
// Configuration
// =============================================================================

/// Acceleration, speed window and microstepping applied by `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionProfile {
    /// Acceleration register value.
    pub acceleration: i64,
    /// Start speed register value.
    pub min_speed: i64,
    /// Top speed register value.
    pub max_speed: i64,
    /// Microsteps per full step (1, 2, 4, 8 or 16).
    pub microsteps: i64,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            acceleration: 16000,
            min_speed: 30,
            max_speed: 100,
            microsteps: 2,
        }
    }
}

/// Homing search limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    /// Longest distance a single search pass may travel before giving up.
    pub max_travel_steps: i64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            max_travel_steps: 10_000,
        }
    }
}

/// Controller timing and motion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisControllerConfig {
    /// Window for one command/reply exchange.
    pub command_timeout_ms: u64,
    /// Window for a blocking move to report idle.
    pub motion_timeout_ms: u64,
    /// Delay between "is active" queries.
    pub active_poll_interval_ms: u64,
    /// Motion profile handed to `initialize` by callers.
    pub profile: MotionProfile,
    /// Limits for `find_home`.
    pub homing: HomingConfig,
}

impl Default for AxisControllerConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            motion_timeout_ms: DEFAULT_MOTION_TIMEOUT.as_millis() as u64,
            active_poll_interval_ms: DEFAULT_ACTIVE_POLL_INTERVAL.as_millis() as u64,
            profile: MotionProfile::default(),
            homing: HomingConfig::default(),
        }
    }
}

impl AxisControllerConfig {
    /// [`command_timeout_ms`](Self::command_timeout_ms) as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// [`motion_timeout_ms`](Self::motion_timeout_ms) as a `Duration`.
    pub fn motion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion_timeout_ms)
    }

    /// [`active_poll_interval_ms`](Self::active_poll_interval_ms) as a `Duration`.
    pub fn active_poll_interval(&self) -> Duration {
        Duration::from_millis(self.active_poll_interval_ms)
    }
}

// =============================================================================
// Axis State
// =============================================================================

/// Last known configuration and position of one axis.
///
/// Updated from confirmed read-backs and from commands the board accepted.
/// Not a substitute for querying the hardware after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AxisState {
    /// Position counter in steps from home.
    pub position: i64,
    /// Acceleration read back from the board.
    pub acceleration: i64,
    /// Start speed read back from the board.
    pub min_speed: i64,
    /// Top speed read back from the board.
    pub max_speed: i64,
    /// Microstepping last written.
    pub microsteps: i64,
    /// Set by a completed `find_home`; cleared when motion times out.
    pub homed: bool,
}

// =============================================================================
// AxisController
// =============================================================================

/// Driver for the two-axis stepper stage board.
///
/// Owns its transport exclusively. All operations take `&mut self`, so
/// exchanges are strictly serialized.
pub struct AxisController {
    transport: Transport,
    config: AxisControllerConfig,
    axes: [AxisState; 2],
}

impl AxisController {
    /// Wrap an open transport.
    pub fn new(transport: Transport, config: AxisControllerConfig) -> Self {
        Self {
            transport,
            config,
            axes: [AxisState::default(); 2],
        }
    }

    /// Open the serial port and build a controller on it.
    ///
    /// # Errors
    /// Returns [`StageError::Connection`] if the port cannot be opened.
    pub async fn open(
        port_path: &str,
        baud_rate: u32,
        config: AxisControllerConfig,
    ) -> StageResult<Self> {
        let transport = Transport::open(port_path, baud_rate).await?;
        Ok(Self::new(transport, config))
    }

    /// Port this controller talks to.
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Timing and motion settings in use.
    pub fn config(&self) -> &AxisControllerConfig {
        &self.config
    }

    /// Cached state of one axis.
    pub fn axis_state(&self, axis: Axis) -> &AxisState {
        &self.axes[axis.index() as usize]
    }

    fn axis_state_mut(&mut self, axis: Axis) -> &mut AxisState {
        &mut self.axes[axis.index() as usize]
    }

    /// True once `find_home` has completed on both axes.
    pub fn is_homed(&self) -> bool {
        self.axes.iter().all(|state| state.homed)
    }

    pub(crate) fn set_homed(&mut self, homed: bool) {
        for state in self.axes.iter_mut() {
            state.homed = homed;
        }
    }

    // -------------------------------------------------------------------------
    // Exchanges
    // -------------------------------------------------------------------------

    /// Drain stale input, send `command` and collect bytes up to the prompt.
    pub async fn sendget(&mut self, command: &Command, timeout: Duration) -> StageResult<ReadOutcome> {
        let wire = command.encode();
        self.transport.flush_input().await;
        self.transport.write(wire.as_bytes()).await?;
        let outcome = self.transport.read_until(is_reply_complete, timeout).await?;

        tracing::debug!(
            port = %self.transport.name(),
            command = %wire.trim_end(),
            reply = %outcome.text(),
            complete = outcome.is_complete(),
            "Axis exchange"
        );
        Ok(outcome)
    }

    /// Send a command that returns no value.
    ///
    /// A missing prompt is tolerated (the board does not always echo one
    /// before the next poll); it is only logged.
    async fn execute(&mut self, command: Command) -> StageResult<()> {
        let outcome = self.sendget(&command, self.config.command_timeout()).await?;
        if !outcome.is_complete() {
            tracing::warn!(
                command = %command.encode().trim_end(),
                reply = %outcome.text(),
                "No prompt after command"
            );
        }
        Ok(())
    }

    /// Send a query and return its `R` value.
    async fn query(&mut self, command: Command) -> StageResult<i64> {
        let timeout = self.config.command_timeout();
        let outcome = self.sendget(&command, timeout).await?;
        let text = outcome.text();

        match parse_reply(&text)? {
            Some(value) => {
                if !outcome.is_complete() {
                    tracing::warn!(
                        command = %command.encode().trim_end(),
                        reply = %text,
                        "Reply truncated before prompt; using R value"
                    );
                }
                Ok(value)
            }
            None if outcome.is_empty() => Err(StageError::timeout(
                format!("{:?} on axis {}", command.opcode(), command.axis()),
                timeout,
            )),
            None => Err(StageError::protocol(
                format!("no R line in reply to {:?}", command.opcode()),
                text,
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Apply a motion profile to both axes.
    ///
    /// The speed window is written twice per axis; the board does not
    /// reliably latch a single write.
    #[instrument(skip(self), fields(port = %self.transport.name()), err)]
    pub async fn initialize(&mut self, profile: MotionProfile) -> StageResult<()> {
        let mode = StepMode::from_microsteps(profile.microsteps)?;
        for axis in Axis::ALL {
            self.apply_profile(axis, profile).await?;
        }
        self.apply_step_mode(&Axis::ALL, mode).await?;
        tracing::info!(?profile, "Stage initialized");
        Ok(())
    }

    /// Apply a motion profile to a single axis.
    #[instrument(skip(self), fields(port = %self.transport.name()), err)]
    pub async fn initialize_axis(&mut self, axis: Axis, profile: MotionProfile) -> StageResult<()> {
        let mode = StepMode::from_microsteps(profile.microsteps)?;
        self.apply_profile(axis, profile).await?;
        self.apply_step_mode(&[axis], mode).await
    }

    async fn apply_profile(&mut self, axis: Axis, profile: MotionProfile) -> StageResult<()> {
        self.set_acceleration(profile.acceleration, axis).await?;
        self.set_speed(profile.min_speed, profile.max_speed, axis).await?;
        self.set_speed(profile.min_speed, profile.max_speed, axis).await?;
        Ok(())
    }

    /// Write the acceleration, then read back what the board applied.
    #[instrument(skip(self), err)]
    pub async fn set_acceleration(&mut self, value: i64, axis: Axis) -> StageResult<i64> {
        self.execute(Command::with_value(Opcode::SetAcceleration, axis, value))
            .await?;
        let applied = self.get_acceleration(axis).await?;
        if applied != value {
            tracing::info!(%axis, requested = value, applied, "Acceleration clamped by board");
        }
        Ok(applied)
    }

    /// Write the speed window, then read back what the board applied.
    #[instrument(skip(self), err)]
    pub async fn set_speed(&mut self, min: i64, max: i64, axis: Axis) -> StageResult<(i64, i64)> {
        self.execute(Command::with_value(Opcode::SetMinSpeed, axis, min))
            .await?;
        self.execute(Command::with_value(Opcode::SetMaxSpeed, axis, max))
            .await?;
        let applied = self.get_speed(axis).await?;
        if applied != (min, max) {
            tracing::info!(%axis, requested = ?(min, max), applied = ?applied, "Speed window differs from request");
        }
        Ok(applied)
    }

    /// Set microstepping on both axes. Only 1, 2, 4, 8 and 16 are accepted.
    #[instrument(skip(self), err)]
    pub async fn set_stepping(&mut self, microsteps: i64) -> StageResult<()> {
        let mode = StepMode::from_microsteps(microsteps)?;
        self.apply_step_mode(&Axis::ALL, mode).await
    }

    async fn apply_step_mode(&mut self, axes: &[Axis], mode: StepMode) -> StageResult<()> {
        for &axis in axes {
            self.execute(Command::with_value(Opcode::SetStepMode, axis, mode.code()))
                .await?;
            self.axis_state_mut(axis).microsteps = mode.microsteps();
        }
        Ok(())
    }

    /// Acceleration currently applied on one axis.
    pub async fn get_acceleration(&mut self, axis: Axis) -> StageResult<i64> {
        let value = self.query(Command::new(Opcode::GetAcceleration, axis)).await?;
        self.axis_state_mut(axis).acceleration = value;
        Ok(value)
    }

    /// Current `(min, max)` speed window of one axis.
    pub async fn get_speed(&mut self, axis: Axis) -> StageResult<(i64, i64)> {
        let min = self.query(Command::new(Opcode::GetMinSpeed, axis)).await?;
        let max = self.query(Command::new(Opcode::GetMaxSpeed, axis)).await?;
        let state = self.axis_state_mut(axis);
        state.min_speed = min;
        state.max_speed = max;
        Ok((min, max))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Absolute position counters `(x, y)`.
    #[instrument(skip(self), err)]
    pub async fn get_position(&mut self) -> StageResult<(i64, i64)> {
        let x = self.get_axis_position(Axis::X).await?;
        let y = self.get_axis_position(Axis::Y).await?;
        Ok((x, y))
    }

    /// Position counter of one axis.
    pub async fn get_axis_position(&mut self, axis: Axis) -> StageResult<i64> {
        let value = self.query(Command::new(Opcode::GetPosition, axis)).await?;
        self.axis_state_mut(axis).position = value;
        Ok(value)
    }

    /// Decoded status registers `(x, y)`.
    #[instrument(skip(self), err)]
    pub async fn get_status(&mut self) -> StageResult<(StatusBits, StatusBits)> {
        let x = self.get_axis_status(Axis::X).await?;
        let y = self.get_axis_status(Axis::Y).await?;
        Ok((x, y))
    }

    /// Decoded status register of one axis. Faults are logged at `warn`.
    pub async fn get_axis_status(&mut self, axis: Axis) -> StageResult<StatusBits> {
        let raw = self.query(Command::new(Opcode::GetStatus, axis)).await?;
        let status = decode_status_bits(raw);
        if status.has_fault() {
            tracing::warn!(%axis, raw, ?status, "Axis reports fault");
        }
        Ok(status)
    }

    /// Combined limit-switch register: `0x02` X at limit, `0x08` Y at limit.
    pub async fn get_limits(&mut self) -> StageResult<i64> {
        self.query(Command::new(Opcode::GetLimits, Axis::X)).await
    }

    /// Whether the axis is still executing a move.
    pub async fn is_active(&mut self, axis: Axis) -> StageResult<bool> {
        Ok(self.query(Command::new(Opcode::IsActive, axis)).await? != 0)
    }

    // -------------------------------------------------------------------------
    // Motion
    // -------------------------------------------------------------------------

    /// Move both axes to absolute targets.
    ///
    /// Both targets are checked against the safety bounds before anything is
    /// sent. With `block`, returns only once both axes report idle.
    #[instrument(skip(self), err)]
    pub async fn go_to_position(&mut self, x: i64, y: i64, block: bool) -> StageResult<()> {
        Axis::X.check_target(x)?;
        Axis::Y.check_target(y)?;

        self.go_to_axis_position(Axis::X, x).await?;
        self.go_to_axis_position(Axis::Y, y).await?;

        if block {
            self.wait_while_active(Axis::X).await?;
            self.wait_while_active(Axis::Y).await?;
        }
        Ok(())
    }

    /// Bound-checked absolute move of one axis. Does not wait.
    pub async fn go_to_axis_position(&mut self, axis: Axis, target: i64) -> StageResult<()> {
        axis.check_target(target)?;
        self.execute(Command::with_value(Opcode::GoTo, axis, target))
            .await?;
        self.axis_state_mut(axis).position = target;
        Ok(())
    }

    /// Relative move of one axis. Not bound-checked. Does not wait.
    pub async fn move_relative(&mut self, axis: Axis, delta: i64) -> StageResult<()> {
        self.execute(Command::with_value(Opcode::Move, axis, delta))
            .await?;
        self.axis_state_mut(axis).position += delta;
        Ok(())
    }

    /// Poll the axis until it reports idle.
    ///
    /// # Errors
    /// [`StageError::Timeout`] if the axis is still active after the motion
    /// timeout. The axis may still be moving; call [`hard_stop`](Self::hard_stop).
    /// The stage is no longer considered homed afterwards.
    pub async fn wait_while_active(&mut self, axis: Axis) -> StageResult<()> {
        let timeout = self.config.motion_timeout();
        let poll = self.config.active_poll_interval();
        let deadline = Instant::now() + timeout;

        loop {
            if !self.is_active(axis).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.set_homed(false);
                tracing::warn!(%axis, ?timeout, "Motion did not finish; position reference dropped");
                return Err(StageError::timeout(
                    format!("waiting for axis {} to stop", axis),
                    timeout,
                ));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Halt both axes immediately.
    ///
    /// Both axes are always addressed; the first failure is reported after
    /// the second axis has been sent its stop.
    #[instrument(skip(self), err)]
    pub async fn hard_stop(&mut self) -> StageResult<()> {
        let x = self.execute(Command::new(Opcode::HardStop, Axis::X)).await;
        let y = self.execute(Command::new(Opcode::HardStop, Axis::Y)).await;
        tracing::info!(port = %self.transport.name(), "Hard stop issued");
        x.and(y)
    }

    /// Declare the current physical location as the origin. Does not move.
    pub async fn reset_home(&mut self) -> StageResult<()> {
        for axis in Axis::ALL {
            self.execute(Command::new(Opcode::ResetPosition, axis))
                .await?;
            self.axis_state_mut(axis).position = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AxisControllerConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(2));
        assert_eq!(config.motion_timeout(), Duration::from_secs(60));
        assert_eq!(config.active_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.profile.microsteps, 2);
        assert_eq!(config.homing.max_travel_steps, 10_000);
    }
}
