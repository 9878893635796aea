//! Axis controller wire codec.
//!
//! Requests are `C<code> <axis>[ <value>]\n`. The board answers every request
//! with a `>` prompt; queries put an `R <value>` line in front of it.

use xystage_core::{Axis, StageError, StageResult};

/// End-of-reply marker.
pub const PROMPT: u8 = b'>';

/// Numeric command codes understood by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `C1`, write acceleration.
    SetAcceleration,
    /// `C2`, read acceleration.
    GetAcceleration,
    /// `C3`, write start speed.
    SetMinSpeed,
    /// `C4`, read start speed.
    GetMinSpeed,
    /// `C5`, write top speed.
    SetMaxSpeed,
    /// `C6`, read top speed.
    GetMaxSpeed,
    /// `C7`, write microstepping (log2 code).
    SetStepMode,
    /// `C8`, absolute move.
    GoTo,
    /// `C9`, read position counter.
    GetPosition,
    /// `C10`, relative move.
    Move,
    /// `C11`, read busy flag.
    IsActive,
    /// `C12`, read status register.
    GetStatus,
    /// `C13`, read the shared limit-switch register.
    GetLimits,
    /// `C14`, stop immediately.
    HardStop,
    /// `C15`, zero the position counter.
    ResetPosition,
}

impl Opcode {
    /// Number sent after the `C`.
    pub fn code(self) -> u8 {
        match self {
            Opcode::SetAcceleration => 1,
            Opcode::GetAcceleration => 2,
            Opcode::SetMinSpeed => 3,
            Opcode::GetMinSpeed => 4,
            Opcode::SetMaxSpeed => 5,
            Opcode::GetMaxSpeed => 6,
            Opcode::SetStepMode => 7,
            Opcode::GoTo => 8,
            Opcode::GetPosition => 9,
            Opcode::Move => 10,
            Opcode::IsActive => 11,
            Opcode::GetStatus => 12,
            Opcode::GetLimits => 13,
            Opcode::HardStop => 14,
            Opcode::ResetPosition => 15,
        }
    }

    /// Whether the board answers with an `R` line.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Opcode::GetAcceleration
                | Opcode::GetMinSpeed
                | Opcode::GetMaxSpeed
                | Opcode::GetPosition
                | Opcode::IsActive
                | Opcode::GetStatus
                | Opcode::GetLimits
        )
    }
}

/// One request to the board. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    axis: Axis,
    value: Option<i64>,
}

impl Command {
    /// Command without an argument.
    pub fn new(opcode: Opcode, axis: Axis) -> Self {
        Self {
            opcode,
            axis,
            value: None,
        }
    }

    /// Command carrying an integer argument.
    pub fn with_value(opcode: Opcode, axis: Axis, value: i64) -> Self {
        Self {
            opcode,
            axis,
            value: Some(value),
        }
    }

    /// Command being sent.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Axis the command addresses.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Wire text including the trailing newline.
    pub fn encode(&self) -> String {
        match self.value {
            Some(value) => format!("C{} {} {}\n", self.opcode.code(), self.axis.index(), value),
            None => format!("C{} {}\n", self.opcode.code(), self.axis.index()),
        }
    }
}

/// Terminator predicate for [`xystage_core::Transport::read_until`].
pub fn is_reply_complete(buffer: &[u8]) -> bool {
    buffer.contains(&PROMPT)
}

/// Extract the value from the first `R` line of a reply.
///
/// Returns `Ok(None)` when no line starts with `R`; callers that need a value
/// decide what that means. An `R` line that is not exactly `R <int>` is a
/// [`StageError::Protocol`].
pub fn parse_reply(reply: &str) -> StageResult<Option<i64>> {
    let Some(line) = reply
        .lines()
        .map(|line| line.trim().trim_end_matches(PROMPT as char).trim_end())
        .find(|line| line.starts_with('R'))
    else {
        return Ok(None);
    };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 2 || tokens[0] != "R" {
        return Err(StageError::protocol(
            format!("expected 'R <int>', got {} token(s)", tokens.len()),
            reply,
        ));
    }

    tokens[1]
        .parse::<i64>()
        .map(Some)
        .map_err(|e| StageError::protocol(format!("non-integer R payload: {}", e), reply))
}

/// Reply text the board sends for a query answering `value`.
pub fn encode_query_reply(value: i64) -> String {
    format!("R {}\n>", value)
}

/// Microstepping resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    /// 1 microstep.
    Full,
    /// 2 microsteps.
    Half,
    /// 4 microsteps.
    Quarter,
    /// 8 microsteps.
    Eighth,
    /// 16 microsteps.
    Sixteenth,
}

impl StepMode {
    /// Accepts exactly 1, 2, 4, 8 or 16 microsteps per full step.
    pub fn from_microsteps(microsteps: i64) -> StageResult<Self> {
        match microsteps {
            1 => Ok(StepMode::Full),
            2 => Ok(StepMode::Half),
            4 => Ok(StepMode::Quarter),
            8 => Ok(StepMode::Eighth),
            16 => Ok(StepMode::Sixteenth),
            other => Err(StageError::InvalidArgument(format!(
                "microstepping must be one of 1, 2, 4, 8, 16; got {}",
                other
            ))),
        }
    }

    /// Microsteps per full step.
    pub fn microsteps(self) -> i64 {
        1 << self.code()
    }

    /// Value sent with [`Opcode::SetStepMode`] (log2 of the microstep count).
    pub fn code(self) -> i64 {
        match self {
            StepMode::Full => 0,
            StepMode::Half => 1,
            StepMode::Quarter => 2,
            StepMode::Eighth => 3,
            StepMode::Sixteenth => 4,
        }
    }
}
