//! Limit-switch homing against the simulated board.

use xystage_core::{Axis, StageError};
use xystage_driver_axis::{AxisController, AxisControllerConfig, HomingConfig};
use xystage_driver_mock::{mock_transport, AxisBoardSim, MockHandle};

fn homing_stage(board: AxisBoardSim) -> (AxisController, MockHandle<AxisBoardSim>) {
    let (transport, handle) = mock_transport("sim-stage", board);
    let config = AxisControllerConfig {
        command_timeout_ms: 50,
        active_poll_interval_ms: 1,
        ..Default::default()
    };
    (AxisController::new(transport, config), handle)
}

fn physical(handle: &MockHandle<AxisBoardSim>) -> (i64, i64) {
    handle.with_device(|b| (b.physical(Axis::X), b.physical(Axis::Y)))
}

#[tokio::test]
async fn find_home_lands_on_switch_edge() {
    let (mut stage, handle) = homing_stage(AxisBoardSim::at(1234, 987).with_limits(-50, 25));

    stage.find_home().await.unwrap();

    assert!(stage.is_homed());
    assert_eq!(physical(&handle), (-50, 25));
    assert_eq!(stage.get_position().await.unwrap(), (0, 0));
    assert_eq!(stage.get_limits().await.unwrap(), 0x0A);
}

#[tokio::test]
async fn find_home_twice_does_not_drift() {
    let (mut stage, handle) = homing_stage(AxisBoardSim::at(3000, 150));

    stage.find_home().await.unwrap();
    let first = physical(&handle);
    stage.find_home().await.unwrap();
    let second = physical(&handle);

    assert_eq!(first, second);
    assert_eq!(stage.get_position().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn find_home_from_switch_backs_off_and_returns() {
    let (mut stage, handle) = homing_stage(AxisBoardSim::at(0, 0));

    stage.find_home().await.unwrap();

    let requests = handle.requests();
    assert!(requests.contains(&"C8 0 200".to_string()));
    assert!(requests.contains(&"C8 1 100".to_string()));
    assert!(requests.contains(&"C10 0 -4".to_string()));
    assert_eq!(physical(&handle), (0, 0));
}

#[tokio::test]
async fn disconnected_switch_fails_instead_of_looping() {
    let mut board = AxisBoardSim::at(500, 500);
    board.limits_disconnected = true;
    let (transport, handle) = mock_transport("sim-stage", board);
    let config = AxisControllerConfig {
        command_timeout_ms: 50,
        active_poll_interval_ms: 1,
        homing: HomingConfig {
            max_travel_steps: 2000,
        },
        ..Default::default()
    };
    let mut stage = AxisController::new(transport, config);

    let err = stage.find_home().await.unwrap_err();

    assert!(matches!(err, StageError::HomingFailed(_)));
    assert!(err.requires_rehome());
    assert!(!stage.is_homed());

    let requests = handle.requests();
    let coarse_moves = requests.iter().filter(|r| *r == "C10 0 -400").count();
    assert_eq!(coarse_moves, 6);
    assert_eq!(&requests[requests.len() - 2..], ["C14 0", "C14 1"]);
}
