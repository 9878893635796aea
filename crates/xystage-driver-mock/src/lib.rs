//! Mock hardware for xystage
//!
//! This crate provides in-memory serial ports backed by simulated controller
//! boards, so the drivers can be exercised without physical hardware.
//!
//! # Available Devices
//!
//! - [`ScriptedDevice`] - Replies from a fixed queue, one per request
//! - [`AxisBoardSim`] - Two-axis stage board with limit switches and busy polling
//! - [`RotatorSim`] - Wave-plate stepper with an index switch
//!
//! # Usage
//!
//! ```rust,ignore
//! use xystage_driver_mock::{mock_transport, AxisBoardSim};
//!
//! let (transport, handle) = mock_transport("sim-stage", AxisBoardSim::default());
//! let mut stage = AxisController::new(transport, AxisControllerConfig::default());
//! stage.go_to_position(100, 200, true).await?;
//! assert_eq!(handle.with_device(|board| board.physical(Axis::X)), 100);
//! ```

mod axis_board;
mod port;
mod rotator;
mod scripted;

pub use axis_board::{AxisBoardSim, SimAxis};
pub use port::{Framing, MockDevice, MockHandle, MockPort};
pub use rotator::RotatorSim;
pub use scripted::ScriptedDevice;

use xystage_core::Transport;

/// Wrap a device in a [`MockPort`] and hand back a ready [`Transport`].
pub fn mock_transport<D: MockDevice>(name: &str, device: D) -> (Transport, MockHandle<D>) {
    let (port, handle) = MockPort::new(device);
    (Transport::from_stream(name, Box::new(port)), handle)
}
