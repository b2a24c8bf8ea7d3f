use std::time::Duration;

use vrr_kit::*;

mod common;
use common::{test_configs, wait_for, RecordingWriter};

/// With presents absent, the rendering timeout fires, the first keep-alive
/// frame goes out immediately, and the controller hibernates.
#[test]
fn rendering_timeout_enters_hibernate() {
    common::setup_test();
    let writer = RecordingWriter::new();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));

    // Timeout is 30ms; the first inserted frame is written on entry.
    assert!(
        wait_for(500, || controller.state() == VrrState::Hibernate),
        "controller never hibernated: {}",
        controller.dump()
    );
    assert!(
        wait_for(500, || writer.write_count() >= 1),
        "no frame insertion write observed"
    );
    assert_eq!(writer.writes()[0].0, REFRESH_CTRL_NODE);
    assert_eq!(writer.writes()[0].1, PANEL_REFRESH_CTRL_FI);

    // The second frame of the burst follows one minimum frame interval later.
    assert!(
        wait_for(500, || writer.write_count() == 2),
        "insertion burst did not complete"
    );
    assert_eq!(controller.pending_frame_insertions(), 0);

    // Burst done: exactly two frames, no more.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(writer.write_count(), 2);

    controller.stop();
}

/// An expected-present notification wakes the controller out of hibernation.
#[test]
fn hibernate_resumes_on_expected_present() {
    common::setup_test();
    let writer = RecordingWriter::new();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(2));

    assert!(wait_for(500, || controller.state() == VrrState::Hibernate));

    controller.notify_expected_present(now_ns() + 16_666_666, 16_666_666);
    assert!(
        wait_for(500, || controller.state() == VrrState::Rendering),
        "controller did not resume: {}",
        controller.dump()
    );

    controller.stop();
}

/// A present while rendering re-arms the rendering timeout, deferring
/// hibernation.
#[test]
fn presents_defer_hibernation() {
    common::setup_test();
    let writer = RecordingWriter::new();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));

    // Keep presenting for ~90ms, three times the 30ms timeout.
    for _ in 0..9 {
        controller.set_expected_present_time(now_ns(), 16_666_666);
        controller.on_present();
        assert_eq!(controller.state(), VrrState::Rendering);
        std::thread::sleep(Duration::from_millis(10));
    }

    // Once presents stop, hibernation follows.
    assert!(wait_for(500, || controller.state() == VrrState::Hibernate));

    controller.stop();
}

/// Disabling mid-burst drains the queue; re-enabling does not resume the
/// burst.
#[test]
fn disable_mid_burst_stops_insertions() {
    common::setup_test();
    let writer = RecordingWriter::new();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    // Config 2: 5ms timeout, 200ms between inserted frames.
    controller.set_active_vrr_configuration(ConfigId(2));

    // Hibernation entry writes the first frame and schedules the second
    // 200ms out.
    assert!(wait_for(500, || writer.write_count() == 1));
    controller.set_enable(false);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(writer.write_count(), 1, "burst continued after disable");

    controller.set_enable(true);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(writer.write_count(), 1, "burst resumed after re-enable");

    controller.stop();
}

/// A failed panel write consumes the frame anyway; the burst finishes with
/// the right number of attempts and no retries.
#[test]
fn write_failure_consumes_the_frame() {
    common::setup_test();
    let writer = RecordingWriter::failing();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));

    assert!(wait_for(500, || writer.write_count() == 2));
    assert!(wait_for(500, || controller.pending_frame_insertions() == 0));

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(writer.write_count(), 2, "a failed write was retried");

    controller.stop();
}

/// Activating an unknown configuration is ignored with a diagnostic.
#[test]
fn unknown_config_is_ignored() {
    common::setup_test();
    let controller = VrrController::with_writer(None);
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);

    controller.set_active_vrr_configuration(ConfigId(99));
    assert_eq!(controller.state(), VrrState::Disable);

    controller.stop();
}

/// A present without a prior expected-present descriptor is a protocol
/// violation: warn and change nothing.
#[test]
fn present_without_descriptor_is_a_no_op() {
    common::setup_test();
    let controller = VrrController::with_writer(None);
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(3));

    let before = controller.dump();
    controller.on_present();
    let after = controller.dump();
    assert_eq!(before, after, "present without descriptor mutated state");

    controller.stop();
}

/// `reset` empties the queue and the present bookkeeping without killing the
/// worker.
#[test]
fn reset_clears_events_and_descriptors() {
    common::setup_test();
    let controller = VrrController::with_writer(None);
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));
    controller.set_expected_present_time(now_ns(), 16_666_666);

    controller.reset();
    assert!(!controller.dump().contains("RenderingTimeout"));

    // The pending descriptor is gone too: a present now is a no-op.
    controller.on_present();
    assert!(!controller.dump().contains("RenderingTimeout"));

    // Idempotent.
    controller.reset();
    let dump = controller.dump();

    // The worker survives a reset and keeps dispatching afterwards.
    controller.set_active_vrr_configuration(ConfigId(2));
    assert!(wait_for(500, || controller.state() == VrrState::Hibernate), "{dump}");

    controller.stop();
}

/// Double enable behaves like a single enable.
#[test]
fn enable_is_idempotent() {
    common::setup_test();
    let writer = RecordingWriter::new();
    let controller = VrrController::with_writer(Some(writer.clone()));
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));

    assert!(wait_for(500, || controller.state() == VrrState::Hibernate));
    assert!(wait_for(500, || writer.write_count() == 2));

    controller.stop();
}

/// Repeated presents never leave more than one rendering timeout queued.
#[test]
fn rendering_timeout_is_single_instance() {
    common::setup_test();
    let controller = VrrController::with_writer(None);
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(3));

    for _ in 0..5 {
        controller.set_expected_present_time(now_ns(), 16_666_666);
        controller.on_present();
    }

    let dump = controller.dump();
    assert_eq!(
        dump.matches("RenderingTimeout").count(),
        1,
        "expected exactly one queued rendering timeout: {dump}"
    );

    controller.stop();
}

/// The present history ring shows up in the diagnostic dump.
#[test]
fn dump_contains_present_history() {
    common::setup_test();
    let controller = VrrController::with_writer(None);
    controller.set_vrr_configurations(test_configs());
    controller.set_enable(true);
    controller.set_active_vrr_configuration(ConfigId(1));

    controller.set_expected_present_time(123_456_789, 16_666_666);
    controller.on_present();

    let dump = controller.dump();
    assert!(dump.contains("time = 123456789 ns"), "{dump}");

    controller.stop();
}
