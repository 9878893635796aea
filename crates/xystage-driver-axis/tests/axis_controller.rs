//! AxisController behaviour against scripted and simulated boards.

use xystage_core::{Axis, StageError};
use xystage_driver_axis::{AxisController, AxisControllerConfig, MotionProfile};
use xystage_driver_mock::{mock_transport, AxisBoardSim, MockDevice, MockHandle, ScriptedDevice};

fn fast_config() -> AxisControllerConfig {
    AxisControllerConfig {
        command_timeout_ms: 50,
        motion_timeout_ms: 1000,
        active_poll_interval_ms: 1,
        ..Default::default()
    }
}

fn controller<D: MockDevice>(device: D) -> (AxisController, MockHandle<D>) {
    let (transport, handle) = mock_transport("sim-stage", device);
    (AxisController::new(transport, fast_config()), handle)
}

#[tokio::test]
async fn get_position_reads_r_value() {
    let (mut stage, handle) = controller(ScriptedDevice::lines(["R 42\n>", "R -3\n>"]));

    let (x, y) = stage.get_position().await.unwrap();

    assert_eq!(x, 42);
    assert_eq!(y, -3);
    assert!(handle.written().starts_with("C9 0\n"));
    assert_eq!(handle.requests(), vec!["C9 0", "C9 1"]);
    assert_eq!(stage.axis_state(Axis::X).position, 42);
}

#[tokio::test]
async fn reply_without_r_line_is_protocol_error() {
    let (mut stage, _handle) = controller(ScriptedDevice::lines(["garbage"]));

    let err = stage.get_position().await.unwrap_err();
    assert!(matches!(err, StageError::Protocol { .. }));
    assert!(err.requires_rehome());
}

#[tokio::test]
async fn truncated_malformed_r_line_is_protocol_error() {
    let (mut stage, _handle) = controller(ScriptedDevice::lines(["R 4 2"]));

    assert!(matches!(
        stage.get_limits().await,
        Err(StageError::Protocol { .. })
    ));
}

#[tokio::test]
async fn truncated_but_parseable_reply_is_accepted() {
    let (mut stage, _handle) = controller(ScriptedDevice::lines(["R 10\n"]));

    assert_eq!(stage.get_limits().await.unwrap(), 10);
}

#[tokio::test]
async fn silent_board_times_out_queries() {
    let (mut stage, _handle) = controller(ScriptedDevice::lines(Vec::<String>::new()));

    let err = stage.is_active(Axis::Y).await.unwrap_err();
    assert!(matches!(err, StageError::Timeout { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn silent_board_tolerated_for_hard_stop() {
    let (mut stage, handle) = controller(ScriptedDevice::lines(Vec::<String>::new()));

    stage.hard_stop().await.unwrap();
    assert_eq!(handle.requests(), vec!["C14 0", "C14 1"]);
}

#[tokio::test]
async fn out_of_range_targets_write_nothing() {
    let (mut stage, handle) = controller(AxisBoardSim::default());

    for (x, y) in [(7001, 0), (0, 4501), (9000, 9000), (i64::MAX, 0)] {
        let err = stage.go_to_position(x, y, true).await.unwrap_err();
        assert!(matches!(err, StageError::OutOfRange { .. }), "{:?}", err);
        assert!(err.is_validation());
    }
    assert!(handle.written().is_empty());
}

#[tokio::test]
async fn go_to_position_blocks_until_idle() {
    let mut board = AxisBoardSim::default();
    board.busy_polls = 3;
    let (mut stage, handle) = controller(board);

    stage.go_to_position(7000, 4500, true).await.unwrap();

    assert_eq!(handle.with_device(|b| b.physical(Axis::X)), 7000);
    assert_eq!(handle.with_device(|b| b.physical(Axis::Y)), 4500);
    let polls = handle
        .requests()
        .iter()
        .filter(|r| r.starts_with("C11 "))
        .count();
    assert_eq!(polls, 8);
    assert_eq!(stage.get_position().await.unwrap(), (7000, 4500));
}

#[tokio::test]
async fn go_to_position_non_blocking_skips_polling() {
    let (mut stage, handle) = controller(AxisBoardSim::default());

    stage.go_to_position(-250, 20, false).await.unwrap();

    assert_eq!(handle.requests(), vec!["C8 0 -250", "C8 1 20"]);
}

#[tokio::test]
async fn stuck_motion_times_out() {
    let mut board = AxisBoardSim::default();
    board.stuck_busy = true;
    let (transport, _handle) = mock_transport("sim-stage", board);
    let config = AxisControllerConfig {
        motion_timeout_ms: 30,
        ..fast_config()
    };
    let mut stage = AxisController::new(transport, config);

    let err = stage.go_to_position(100, 100, true).await.unwrap_err();
    assert!(matches!(err, StageError::Timeout { .. }));
}

#[tokio::test]
async fn motion_timeout_drops_homed_flag() {
    let (transport, handle) = mock_transport("sim-stage", AxisBoardSim::at(300, 200));
    let config = AxisControllerConfig {
        motion_timeout_ms: 30,
        ..fast_config()
    };
    let mut stage = AxisController::new(transport, config);
    stage.find_home().await.unwrap();
    assert!(stage.is_homed());

    handle.with_device(|board| board.stuck_busy = true);
    let err = stage.go_to_position(100, 100, true).await.unwrap_err();

    assert!(matches!(err, StageError::Timeout { .. }));
    assert!(!stage.is_homed());
    assert!(!stage.axis_state(Axis::X).homed);
}

#[tokio::test]
async fn set_stepping_validates_before_io() {
    let (mut stage, handle) = controller(AxisBoardSim::default());

    for microsteps in [-4, 0, 3, 6, 32] {
        assert!(matches!(
            stage.set_stepping(microsteps).await,
            Err(StageError::InvalidArgument(_))
        ));
    }
    assert!(handle.written().is_empty());

    stage.set_stepping(8).await.unwrap();
    assert_eq!(handle.requests(), vec!["C7 0 3", "C7 1 3"]);
    assert_eq!(stage.axis_state(Axis::Y).microsteps, 8);
}

#[tokio::test]
async fn set_speed_returns_clamped_value() {
    let mut board = AxisBoardSim::default();
    board.speed_ceiling = 1000;
    let (mut stage, _handle) = controller(board);

    let applied = stage.set_speed(30, 5000, Axis::X).await.unwrap();

    assert_eq!(applied, (30, 1000));
    assert_eq!(stage.axis_state(Axis::X).max_speed, 1000);
}

#[tokio::test]
async fn set_acceleration_reads_back() {
    let (mut stage, handle) = controller(AxisBoardSim::default());

    assert_eq!(stage.set_acceleration(16000, Axis::Y).await.unwrap(), 16000);
    assert_eq!(handle.requests(), vec!["C1 1 16000", "C2 1"]);
}

#[tokio::test]
async fn initialize_latches_speed_despite_board_quirk() {
    let mut board = AxisBoardSim::default();
    board.speed_latch_quirk = true;
    let (mut stage, handle) = controller(board);
    let profile = MotionProfile {
        acceleration: 12000,
        min_speed: 40,
        max_speed: 400,
        microsteps: 16,
    };

    stage.initialize(profile).await.unwrap();

    for axis in Axis::ALL {
        let sim = handle.with_device(|b| b.axis(axis).clone());
        assert_eq!(sim.acceleration, 12000);
        assert_eq!(sim.min_speed, 40);
        assert_eq!(sim.max_speed, 400);
        assert_eq!(sim.step_code, 4);

        let state = stage.axis_state(axis);
        assert_eq!((state.min_speed, state.max_speed), (40, 400));
        assert_eq!(state.microsteps, 16);
    }
}

#[tokio::test]
async fn initialize_rejects_bad_microsteps_before_io() {
    let (mut stage, handle) = controller(AxisBoardSim::default());
    let profile = MotionProfile {
        microsteps: 5,
        ..MotionProfile::default()
    };

    assert!(matches!(
        stage.initialize(profile).await,
        Err(StageError::InvalidArgument(_))
    ));
    assert!(handle.written().is_empty());
}

#[tokio::test]
async fn get_status_decodes_both_axes() {
    let (mut stage, handle) = controller(AxisBoardSim::default());
    handle.with_device(|b| b.axis_mut(Axis::Y).status_override = Some(0x0E00));

    let (x, y) = stage.get_status().await.unwrap();

    assert!(!x.has_fault());
    assert!(y.over_current);
    assert!(!y.thermal_shutdown);
}

#[tokio::test]
async fn hard_stop_and_reset_home() {
    let (mut stage, handle) = controller(AxisBoardSim::at(300, 200));

    stage.hard_stop().await.unwrap();
    let (x, _) = stage.get_status().await.unwrap();
    assert!(x.hiz);

    stage.reset_home().await.unwrap();
    assert_eq!(stage.get_position().await.unwrap(), (0, 0));
    assert_eq!(handle.with_device(|b| b.physical(Axis::X)), 300);
}

#[tokio::test]
async fn single_axis_primitives() {
    let (mut stage, handle) = controller(AxisBoardSim::at(1000, 1000));
    assert_eq!(stage.get_position().await.unwrap(), (1000, 1000));

    stage.move_relative(Axis::X, -600).await.unwrap();
    stage.wait_while_active(Axis::X).await.unwrap();
    assert_eq!(stage.axis_state(Axis::X).position, 400);
    assert_eq!(stage.get_axis_position(Axis::X).await.unwrap(), 400);

    assert!(matches!(
        stage.go_to_axis_position(Axis::Y, 4501).await,
        Err(StageError::OutOfRange { axis: Axis::Y, .. })
    ));
    stage.go_to_axis_position(Axis::Y, 4500).await.unwrap();
    assert!(stage.is_active(Axis::Y).await.unwrap());
    assert!(!stage.is_active(Axis::Y).await.unwrap());
    assert_eq!(handle.with_device(|b| b.physical(Axis::Y)), 4500);
}
