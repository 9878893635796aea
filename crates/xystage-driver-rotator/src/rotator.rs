//! Half-wave-plate rotator driver.
//!
//! The board only knows single steps: `a` forward, `b` backward, `r` to
//! report. Its step counter is never reset, so the driver keeps the counter
//! value at the last confirmed home and reports steps relative to it.

use crate::protocol::{is_reply_complete, parse_response, RotatorCommand};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use xystage_core::limits::DEFAULT_COMMAND_TIMEOUT;
use xystage_core::{StageError, StageResult, Transport};

/// Rotator timing and search limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    /// Window for one command/reply exchange.
    pub command_timeout_ms: u64,
    /// Most single steps taken in each direction while bracketing the index.
    pub home_search_limit: u32,
    /// Send one throwaway status query before `initialize` reads the state.
    /// Boards that print a banner after the port opens (and the DTR reset)
    /// answer the first request with it.
    pub discard_first_reply: bool,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            home_search_limit: 2000,
            discard_first_reply: false,
        }
    }
}

impl RotatorConfig {
    /// [`command_timeout_ms`](Self::command_timeout_ms) as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Position of the rotator relative to the last home, and the index switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RotatorState {
    /// Steps from the last home (board counter before the first home).
    pub steps: i64,
    /// Index switch closed.
    pub index_switch: bool,
}

/// Driver for the indexed wave-plate rotator board.
pub struct IndexedRotator {
    transport: Transport,
    config: RotatorConfig,
    state: Option<RotatorState>,
    /// Board counter value at the last confirmed home.
    home_offset: i64,
}

impl IndexedRotator {
    /// Wrap an open transport.
    pub fn new(transport: Transport, config: RotatorConfig) -> Self {
        Self {
            transport,
            config,
            state: None,
            home_offset: 0,
        }
    }

    /// Open the serial port and build a rotator on it.
    pub async fn open(port_path: &str, baud_rate: u32, config: RotatorConfig) -> StageResult<Self> {
        let transport = Transport::open(port_path, baud_rate).await?;
        Ok(Self::new(transport, config))
    }

    /// Port this rotator talks to.
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Driver settings in use.
    pub fn config(&self) -> &RotatorConfig {
        &self.config
    }

    /// Last reported state, `None` until the first exchange.
    pub fn state(&self) -> Option<RotatorState> {
        self.state
    }

    /// One request/reply exchange; updates the cached state.
    async fn exchange(&mut self, command: RotatorCommand) -> StageResult<RotatorState> {
        let timeout = self.config.command_timeout();
        self.transport.flush_input().await;
        self.transport.write(&[command.as_byte()]).await?;
        let outcome = self.transport.read_until(is_reply_complete, timeout).await?;
        let text = outcome.text();

        tracing::debug!(
            port = %self.transport.name(),
            command = %(command.as_byte() as char),
            reply = %text.trim_end(),
            complete = outcome.is_complete(),
            "Rotator exchange"
        );

        if outcome.is_empty() {
            return Err(StageError::timeout(format!("rotator {:?}", command), timeout));
        }
        let (board_steps, index_switch) = parse_response(&text)?;
        if !outcome.is_complete() {
            tracing::warn!(reply = %text, "Rotator reply missing line end; using parsed value");
        }

        let state = RotatorState {
            steps: board_steps - self.home_offset,
            index_switch,
        };
        self.state = Some(state);
        Ok(state)
    }

    /// Query the board and capture `(steps, index_switch)`.
    #[instrument(skip(self), fields(port = %self.transport.name()), err)]
    pub async fn initialize(&mut self) -> StageResult<RotatorState> {
        if self.config.discard_first_reply {
            match self.exchange(RotatorCommand::Status).await {
                Err(StageError::Io(e)) => return Err(StageError::Io(e)),
                Err(e) => tracing::debug!(error = %e, "Discarded first rotator reply"),
                Ok(_) => {}
            }
        }
        let state = self.exchange(RotatorCommand::Status).await?;
        tracing::info!(steps = state.steps, index_switch = state.index_switch, "Rotator initialized");
        Ok(state)
    }

    /// One step forward.
    pub async fn increment(&mut self) -> StageResult<RotatorState> {
        self.exchange(RotatorCommand::Increment).await
    }

    /// One step backward.
    pub async fn decrement(&mut self) -> StageResult<RotatorState> {
        self.exchange(RotatorCommand::Decrement).await
    }

    /// Locate the index edge and make it step 0.
    ///
    /// Steps forward while the switch is closed until it opens, then back
    /// until it closes again. Approaching from the open side makes the edge
    /// independent of the switch hysteresis.
    ///
    /// # Errors
    /// [`StageError::HomingFailed`] if either bracket takes more than
    /// `home_search_limit` steps.
    #[instrument(skip(self), fields(port = %self.transport.name()), err)]
    pub async fn find_home(&mut self) -> StageResult<RotatorState> {
        let limit = self.config.home_search_limit;
        let mut state = self.initialize().await?;

        let mut taken = 0u32;
        while state.index_switch {
            if taken >= limit {
                return Err(StageError::HomingFailed(format!(
                    "index switch still closed after {} forward steps",
                    limit
                )));
            }
            state = self.increment().await?;
            taken += 1;
        }
        tracing::debug!(steps = taken, "Index switch released");

        let mut taken = 0u32;
        while !state.index_switch {
            if taken >= limit {
                return Err(StageError::HomingFailed(format!(
                    "index switch not found within {} backward steps",
                    limit
                )));
            }
            state = self.decrement().await?;
            taken += 1;
        }

        self.home_offset += state.steps;
        let home = RotatorState {
            steps: 0,
            index_switch: true,
        };
        self.state = Some(home);
        tracing::info!(board_steps = self.home_offset, "Rotator homed");
        Ok(home)
    }

    /// Step `steps_to_move` times; the sign selects the direction.
    ///
    /// No bounds beyond the hardware's own. Returns the final state. A zero
    /// move sends nothing and returns the cached state, querying the board
    /// only if nothing is cached yet.
    #[instrument(skip(self), fields(port = %self.transport.name()), err)]
    pub async fn move_steps(&mut self, steps_to_move: i64) -> StageResult<RotatorState> {
        if steps_to_move == 0 {
            return match self.state {
                Some(state) => Ok(state),
                None => self.initialize().await,
            };
        }

        let command = if steps_to_move > 0 {
            RotatorCommand::Increment
        } else {
            RotatorCommand::Decrement
        };

        let mut state = RotatorState::default();
        for _ in 0..steps_to_move.unsigned_abs() {
            state = self.exchange(command).await?;
        }
        tracing::debug!(steps = state.steps, index_switch = state.index_switch, "Rotator move done");
        Ok(state)
    }

    /// Move to a step count relative to home.
    pub async fn move_to(&mut self, target: i64) -> StageResult<RotatorState> {
        let current = match self.state {
            Some(state) => state.steps,
            None => self.initialize().await?.steps,
        };
        self.move_steps(target - current).await
    }
}
