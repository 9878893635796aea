//! Indexed wave-plate rotator driver for xystage
//!
//! The rotator is a single stepper turning a half-wave plate, with one index
//! switch marking home. It speaks a one-character protocol and answers each
//! request with a `...:<steps> <switch>` line.
//!
//! # Example
//!
//! ```rust,ignore
//! use xystage_driver_rotator::{IndexedRotator, RotatorConfig};
//!
//! let mut hwp = IndexedRotator::open("/dev/ttyACM0", 9600, RotatorConfig::default()).await?;
//! hwp.find_home().await?;
//! let state = hwp.move_steps(25).await?;
//! assert_eq!(state.steps, 25);
//! ```

pub mod protocol;
pub mod rotator;

pub use protocol::{parse_response, RotatorCommand};
pub use rotator::{IndexedRotator, RotatorConfig, RotatorState};
