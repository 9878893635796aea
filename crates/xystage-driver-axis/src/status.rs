//! Status register decoding.
//!
//! The register follows the dSPIN/powerSTEP layout: motion flags are active
//! high, fault flags are active low.

use serde::Serialize;

const HIZ: u16 = 0x0001;
const DIR: u16 = 0x0010;
const CANT_PERFORM_COMMAND: u16 = 0x0080;
const WRONG_COMMAND: u16 = 0x0100;
const UNDER_VOLTAGE: u16 = 0x0200;
const THERMAL_WARNING: u16 = 0x0400;
const THERMAL_SHUTDOWN: u16 = 0x0800;
const OVER_CURRENT: u16 = 0x1000;

/// Decoded status register of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct StatusBits {
    /// Overcurrent detected (active low `0x1000`).
    pub over_current: bool,
    /// Thermal shutdown (active low `0x0800`).
    pub thermal_shutdown: bool,
    /// Thermal warning (active low `0x0400`).
    pub thermal_warning: bool,
    /// Supply under-voltage lockout (active low `0x0200`).
    pub under_voltage: bool,
    /// Last command was not recognised.
    pub wrong_command: bool,
    /// Last command could not be executed.
    pub cant_perform_command: bool,
    /// Forward direction.
    pub dir: bool,
    /// Bridges in high impedance (motor unpowered).
    pub hiz: bool,
}

impl StatusBits {
    /// Any fault flag raised.
    pub fn has_fault(&self) -> bool {
        self.over_current
            || self.thermal_shutdown
            || self.thermal_warning
            || self.under_voltage
            || self.wrong_command
            || self.cant_perform_command
    }
}

impl From<u16> for StatusBits {
    fn from(raw: u16) -> Self {
        let set = |mask: u16| raw & mask != 0;
        Self {
            over_current: !set(OVER_CURRENT),
            thermal_shutdown: !set(THERMAL_SHUTDOWN),
            thermal_warning: !set(THERMAL_WARNING),
            under_voltage: !set(UNDER_VOLTAGE),
            wrong_command: set(WRONG_COMMAND),
            cant_perform_command: set(CANT_PERFORM_COMMAND),
            dir: set(DIR),
            hiz: set(HIZ),
        }
    }
}

/// Decode a register value as reported by the board.
///
/// Never fails: only the low 16 bits are looked at and whatever pattern they
/// hold is reported as-is.
pub fn decode_status_bits(raw: i64) -> StatusBits {
    StatusBits::from((raw & 0xFFFF) as u16)
}
