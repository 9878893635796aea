//! Linear stage axis identifiers.

use crate::error::{StageError, StageResult};
use crate::limits::{X_MAX_STEPS, Y_MAX_STEPS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independently addressed linear axes.
///
/// The wire protocol addresses axes by index: X is `0`, Y is `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Wire index 0.
    X,
    /// Wire index 1.
    Y,
}

impl Axis {
    /// Both axes in wire-index order.
    pub const ALL: [Axis; 2] = [Axis::X, Axis::Y];

    /// Wire index of this axis.
    pub fn index(self) -> u8 {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
        }
    }

    /// Largest absolute target the stage may be commanded to on this axis.
    pub fn max_position(self) -> i64 {
        match self {
            Axis::X => X_MAX_STEPS,
            Axis::Y => Y_MAX_STEPS,
        }
    }

    /// Reject targets above the safety bound for this axis.
    pub fn check_target(self, target: i64) -> StageResult<()> {
        let max = self.max_position();
        if target > max {
            return Err(StageError::OutOfRange {
                axis: self,
                target,
                max,
            });
        }
        Ok(())
    }
}

impl TryFrom<u8> for Axis {
    type Error = StageError;

    fn try_from(index: u8) -> StageResult<Self> {
        match index {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            other => Err(StageError::InvalidArgument(format!(
                "axis index must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}
