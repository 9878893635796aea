//! IndexedRotator behaviour against scripted and simulated boards.

use xystage_core::StageError;
use xystage_driver_mock::{mock_transport, MockDevice, MockHandle, RotatorSim, ScriptedDevice};
use xystage_driver_rotator::{IndexedRotator, RotatorConfig, RotatorState};

fn rotator<D: MockDevice>(device: D) -> (IndexedRotator, MockHandle<D>) {
    let (transport, handle) = mock_transport("sim-hwp", device);
    let config = RotatorConfig {
        command_timeout_ms: 50,
        ..Default::default()
    };
    (IndexedRotator::new(transport, config), handle)
}

#[tokio::test]
async fn initialize_captures_status() {
    let (mut hwp, handle) = rotator(ScriptedDevice::bytes(["status:7 1\n"]));

    let state = hwp.initialize().await.unwrap();

    assert_eq!(state, RotatorState { steps: 7, index_switch: true });
    assert_eq!(hwp.state(), Some(state));
    assert_eq!(handle.written(), "r");
}

#[tokio::test]
async fn find_home_brackets_index_edge() {
    let script = ScriptedDevice::bytes([
        "status:0 1\n",
        "step:1 1\n",
        "step:2 1\n",
        "step:3 0\n",
        "step:2 0\n",
        "step:1 1\n",
    ]);
    let (mut hwp, handle) = rotator(script);

    let home = hwp.find_home().await.unwrap();

    assert_eq!(home.steps, 0);
    assert!(home.index_switch);
    assert_eq!(handle.written(), "raaabb");
    assert_eq!(handle.with_device(|d| d.remaining()), 0);
}

#[tokio::test]
async fn steps_are_relative_to_home() {
    let (mut hwp, handle) = rotator(RotatorSim::at(37).with_index(10, 14, 2));

    hwp.find_home().await.unwrap();
    assert_eq!(handle.with_device(|d| d.steps), 14);

    let state = hwp.move_steps(25).await.unwrap();
    assert_eq!(state.steps, 25);
    assert!(!state.index_switch);

    let state = hwp.move_to(-3).await.unwrap();
    assert_eq!(state.steps, -3);
    assert_eq!(handle.with_device(|d| d.steps), 11);
    assert!(state.index_switch);
}

#[tokio::test]
async fn move_steps_sends_one_byte_per_step() {
    let (mut hwp, handle) = rotator(RotatorSim::at(100));
    hwp.initialize().await.unwrap();
    handle.clear();

    let state = hwp.move_steps(-4).await.unwrap();

    assert_eq!(handle.written(), "bbbb");
    assert_eq!(state.steps, 96);
}

#[tokio::test]
async fn silent_rotator_times_out() {
    let mut sim = RotatorSim::default();
    sim.silent = true;
    let (mut hwp, _handle) = rotator(sim);

    let err = hwp.initialize().await.unwrap_err();
    assert!(matches!(err, StageError::Timeout { .. }));
    assert_eq!(hwp.state(), None);
}

#[tokio::test]
async fn garbled_reply_is_protocol_error() {
    let (mut hwp, _handle) = rotator(ScriptedDevice::bytes(["?\n"]));

    assert!(matches!(
        hwp.increment().await,
        Err(StageError::Protocol { .. })
    ));
}

#[tokio::test]
async fn find_home_gives_up_without_index() {
    let (transport, _handle) = mock_transport("sim-hwp", RotatorSim::at(500));
    let config = RotatorConfig {
        command_timeout_ms: 50,
        home_search_limit: 20,
        ..Default::default()
    };
    let mut hwp = IndexedRotator::new(transport, config);

    let err = hwp.find_home().await.unwrap_err();
    assert!(matches!(err, StageError::HomingFailed(_)));
}

#[tokio::test]
async fn zero_move_uses_cached_state_without_io() {
    let (mut hwp, handle) = rotator(RotatorSim::at(37).with_index(10, 14, 2));
    hwp.find_home().await.unwrap();
    handle.clear();

    let state = hwp.move_steps(0).await.unwrap();
    assert_eq!(state, RotatorState { steps: 0, index_switch: true });
    let state = hwp.move_to(0).await.unwrap();
    assert_eq!(state.steps, 0);

    assert_eq!(handle.written(), "");
}

#[tokio::test]
async fn zero_move_before_initialize_queries_once() {
    let (mut hwp, handle) = rotator(ScriptedDevice::bytes(["status:5 0\n"]));

    let state = hwp.move_steps(0).await.unwrap();

    assert_eq!(state, RotatorState { steps: 5, index_switch: false });
    assert_eq!(handle.written(), "r");
}

#[tokio::test]
async fn initialize_can_discard_boot_banner() {
    let (transport, handle) = mock_transport(
        "sim-hwp",
        ScriptedDevice::bytes(["rotator v1 ready\n", "status:7 1\n"]),
    );
    let config = RotatorConfig {
        command_timeout_ms: 50,
        discard_first_reply: true,
        ..Default::default()
    };
    let mut hwp = IndexedRotator::new(transport, config);

    let state = hwp.initialize().await.unwrap();

    assert_eq!(state, RotatorState { steps: 7, index_switch: true });
    assert_eq!(handle.written(), "rr");
}
