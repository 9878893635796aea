//! Simulated two-axis stage controller board.
//!
//! Speaks the `C<code> <axis> [<value>]` protocol: query replies are
//! `R <value>\n>`, everything else answers with a bare `>` prompt.

use crate::port::{Framing, MockDevice};
use xystage_core::Axis;

const SET_ACCELERATION: u32 = 1;
const GET_ACCELERATION: u32 = 2;
const SET_MIN_SPEED: u32 = 3;
const GET_MIN_SPEED: u32 = 4;
const SET_MAX_SPEED: u32 = 5;
const GET_MAX_SPEED: u32 = 6;
const SET_STEP_MODE: u32 = 7;
const GO_TO: u32 = 8;
const GET_POSITION: u32 = 9;
const MOVE: u32 = 10;
const IS_ACTIVE: u32 = 11;
const GET_STATUS: u32 = 12;
const GET_LIMITS: u32 = 13;
const HARD_STOP: u32 = 14;
const RESET_POSITION: u32 = 15;

/// Active-low fault flags all high: no fault.
const STATUS_IDLE: u16 = 0x1E00;
const STATUS_HIZ: u16 = 0x0001;
const STATUS_DIR: u16 = 0x0010;
const STATUS_WRONG_CMD: u16 = 0x0100;

/// One simulated axis.
#[derive(Debug, Clone)]
pub struct SimAxis {
    /// Mechanical position in steps.
    pub physical: i64,
    /// Physical position the counter reads zero at.
    pub origin: i64,
    /// Limit switch is closed at or below this physical position.
    pub limit_at: i64,
    /// Latched acceleration.
    pub acceleration: i64,
    /// Latched start speed.
    pub min_speed: i64,
    /// Latched top speed.
    pub max_speed: i64,
    /// Step mode code last written.
    pub step_code: i64,
    /// Replaces the computed status register when set.
    pub status_override: Option<u16>,
    busy_remaining: u32,
    forward: bool,
    hiz: bool,
    wrong_command: bool,
    pending_min_speed: Option<i64>,
    pending_max_speed: Option<i64>,
}

impl SimAxis {
    fn new(physical: i64) -> Self {
        Self {
            physical,
            origin: 0,
            limit_at: 0,
            acceleration: 0,
            min_speed: 0,
            max_speed: 0,
            step_code: 0,
            status_override: None,
            busy_remaining: 0,
            forward: true,
            hiz: false,
            wrong_command: false,
            pending_min_speed: None,
            pending_max_speed: None,
        }
    }

    fn counter(&self) -> i64 {
        self.physical - self.origin
    }

    fn status(&self) -> u16 {
        if let Some(raw) = self.status_override {
            return raw;
        }
        let mut raw = STATUS_IDLE;
        if self.hiz {
            raw |= STATUS_HIZ;
        }
        if self.forward {
            raw |= STATUS_DIR;
        }
        if self.wrong_command {
            raw |= STATUS_WRONG_CMD;
        }
        raw
    }

    fn start_motion(&mut self, target: i64, busy_polls: u32, switch_stops: bool) {
        self.forward = target >= self.physical;
        // The limit switch halts reverse motion at its edge.
        self.physical = if switch_stops && !self.forward && target < self.limit_at {
            self.limit_at.min(self.physical)
        } else {
            target
        };
        self.busy_remaining = busy_polls;
        self.hiz = false;
    }
}

/// Two-axis board with limit switches at the low end of travel.
///
/// A reverse move that would cross an axis's switch stops on it, so
/// approaching the switch always lands exactly on `limit_at`.
///
/// Motion is instantaneous, but each move keeps the axis "active" for
/// `busy_polls` subsequent active-state queries.
#[derive(Debug, Clone)]
pub struct AxisBoardSim {
    axes: [SimAxis; 2],
    /// Active-state queries answered with `1` after each move.
    pub busy_polls: u32,
    /// Every active-state query answers `1`.
    pub stuck_busy: bool,
    /// Limit register always reads zero and reverse moves are never halted
    /// (unplugged sensors).
    pub limits_disconnected: bool,
    /// Hardware ceiling applied to speed writes.
    pub speed_ceiling: i64,
    /// Speed writes only latch when the same value is written twice in a row.
    pub speed_latch_quirk: bool,
}

impl Default for AxisBoardSim {
    fn default() -> Self {
        Self::at(0, 0)
    }
}

impl AxisBoardSim {
    /// Board whose axes start at the given physical positions.
    pub fn at(x: i64, y: i64) -> Self {
        Self {
            axes: [SimAxis::new(x), SimAxis::new(y)],
            busy_polls: 1,
            stuck_busy: false,
            limits_disconnected: false,
            speed_ceiling: 1000,
            speed_latch_quirk: false,
        }
    }

    /// Move the limit switches (physical positions).
    pub fn with_limits(mut self, x_limit: i64, y_limit: i64) -> Self {
        self.axes[0].limit_at = x_limit;
        self.axes[1].limit_at = y_limit;
        self
    }

    /// Simulated state of one axis.
    pub fn axis(&self, axis: Axis) -> &SimAxis {
        &self.axes[axis.index() as usize]
    }

    /// Mutable access for fault injection.
    pub fn axis_mut(&mut self, axis: Axis) -> &mut SimAxis {
        &mut self.axes[axis.index() as usize]
    }

    /// Mechanical position of an axis.
    pub fn physical(&self, axis: Axis) -> i64 {
        self.axis(axis).physical
    }

    fn limits(&self) -> i64 {
        if self.limits_disconnected {
            return 0;
        }
        let mut mask = 0;
        if self.axes[0].physical <= self.axes[0].limit_at {
            mask |= 0x02;
        }
        if self.axes[1].physical <= self.axes[1].limit_at {
            mask |= 0x08;
        }
        mask
    }

    fn latch_speed(pending: &mut Option<i64>, current: &mut i64, value: i64, quirk: bool) {
        if !quirk || *pending == Some(value) {
            *current = value;
            *pending = None;
        } else {
            *pending = Some(value);
        }
    }

    fn execute(&mut self, code: u32, index: usize, value: Option<i64>) -> Option<String> {
        let busy_polls = self.busy_polls;
        let ceiling = self.speed_ceiling;
        let quirk = self.speed_latch_quirk;
        let stuck = self.stuck_busy;
        let limits = self.limits();
        let switch_stops = !self.limits_disconnected;
        let axis = self.axes.get_mut(index)?;

        let reply = match (code, value) {
            (SET_ACCELERATION, Some(v)) => {
                axis.acceleration = v;
                String::new()
            }
            (GET_ACCELERATION, None) => format!("R {}\n", axis.acceleration),
            (SET_MIN_SPEED, Some(v)) => {
                let v = v.min(ceiling);
                Self::latch_speed(&mut axis.pending_min_speed, &mut axis.min_speed, v, quirk);
                String::new()
            }
            (GET_MIN_SPEED, None) => format!("R {}\n", axis.min_speed),
            (SET_MAX_SPEED, Some(v)) => {
                let v = v.min(ceiling);
                Self::latch_speed(&mut axis.pending_max_speed, &mut axis.max_speed, v, quirk);
                String::new()
            }
            (GET_MAX_SPEED, None) => format!("R {}\n", axis.max_speed),
            (SET_STEP_MODE, Some(v)) if (0..=4).contains(&v) => {
                axis.step_code = v;
                String::new()
            }
            (GO_TO, Some(v)) => {
                let target = axis.origin + v;
                axis.start_motion(target, busy_polls, switch_stops);
                String::new()
            }
            (GET_POSITION, None) => format!("R {}\n", axis.counter()),
            (MOVE, Some(v)) => {
                let target = axis.physical + v;
                axis.start_motion(target, busy_polls, switch_stops);
                String::new()
            }
            (IS_ACTIVE, None) => {
                let active = if stuck {
                    true
                } else if axis.busy_remaining > 0 {
                    axis.busy_remaining -= 1;
                    true
                } else {
                    false
                };
                format!("R {}\n", u8::from(active))
            }
            (GET_STATUS, None) => {
                let raw = axis.status();
                axis.wrong_command = false;
                format!("R {}\n", raw)
            }
            (GET_LIMITS, None) => format!("R {}\n", limits),
            (HARD_STOP, None) => {
                axis.busy_remaining = 0;
                axis.hiz = true;
                String::new()
            }
            (RESET_POSITION, None) => {
                axis.origin = axis.physical;
                String::new()
            }
            _ => return None,
        };
        Some(reply)
    }
}

fn parse_request(request: &str) -> Option<(u32, usize, Option<i64>)> {
    let mut tokens = request.split_whitespace();
    let code = tokens.next()?.strip_prefix('C')?.parse().ok()?;
    let index = tokens.next()?.parse().ok()?;
    let value = match tokens.next() {
        Some(token) => Some(token.parse().ok()?),
        None => None,
    };
    if tokens.next().is_some() {
        return None;
    }
    Some((code, index, value))
}

impl MockDevice for AxisBoardSim {
    fn framing(&self) -> Framing {
        Framing::Line
    }

    fn respond(&mut self, request: &str) -> String {
        let executed =
            parse_request(request).and_then(|(code, index, value)| self.execute(code, index, value));
        match executed {
            Some(body) => format!("{}>", body),
            None => {
                for axis in self.axes.iter_mut() {
                    axis.wrong_command = true;
                }
                "E\n>".to_string()
            }
        }
    }
}
