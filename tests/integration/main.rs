//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)
#![expect(
    clippy::tests_outside_test_module,
    reason = "This is the integration test binary, so it's expected that tests are outside of a test module"
)]
#![expect(clippy::indexing_slicing, reason = "This is not problematic in tests")]
#![expect(clippy::unwrap_used, reason = "Using unwrap in tests is fine")]

extern crate alloc;
extern crate core;

mod advertisement;
mod common;
mod config;

use core::{sync::atomic::Ordering, time::Duration};

use tokio::time::sleep;

use quine_runtime::{
    app::{Visibility, spawn_runtime},
    health::{HealthState, ProbeTimeouts},
    launch::{CAMERA_TARGET, LaunchStep, X11_TARGET},
    status::Notice,
};

use common::{
    CountingBackend, RecordingLauncher, eventually, fast_settings, harness, next_notice,
    refused_endpoint, serve_ok, serve_ok_after, wait_for_status,
};

#[tokio::test]
async fn visible_runtime_publishes_title_and_health() {
    let endpoint = serve_ok().await;
    let mut h = harness(RecordingLauncher::default(), CountingBackend::default());
    h.address.set([192, 168, 1, 42]);

    let handle = spawn_runtime(fast_settings(endpoint), h.collaborators, Visibility::Visible);

    let status = wait_for_status(&mut h.status, |s| {
        s.title == "QuineOS (u0_a7@192.168.1.42)" && s.health == HealthState::Up
    })
    .await;
    assert_eq!(status.health.indicator_color(), "green");

    h.address.set([10, 0, 0, 3]);
    wait_for_status(&mut h.status, |s| s.title == "QuineOS (u0_a7@10.0.0.3)").await;

    handle.shutdown().await;
}

#[tokio::test]
async fn missing_network_shows_placeholder_address() {
    let endpoint = refused_endpoint().await;
    let mut h = harness(RecordingLauncher::default(), CountingBackend::default());

    let handle = spawn_runtime(fast_settings(endpoint), h.collaborators, Visibility::Visible);

    let status = wait_for_status(&mut h.status, |s| {
        !s.title.is_empty() && s.health != HealthState::Unknown
    })
    .await;
    assert_eq!(status.title, "QuineOS (u0_a7@0.0.0.0)");
    assert_eq!(status.health, HealthState::Down);

    handle.shutdown().await;
}

#[tokio::test]
async fn hidden_runtime_does_not_touch_the_display() {
    let endpoint = serve_ok().await;
    let mut h = harness(RecordingLauncher::default(), CountingBackend::default());
    h.address.set([192, 168, 1, 42]);

    let handle = spawn_runtime(fast_settings(endpoint), h.collaborators, Visibility::Hidden);

    sleep(Duration::from_millis(300)).await;
    assert!(!h.status.has_changed().unwrap(), "no updates while hidden");

    assert!(handle.set_visibility(Visibility::Visible));
    wait_for_status(&mut h.status, |s| {
        s.title == "QuineOS (u0_a7@192.168.1.42)" && s.health == HealthState::Up
    })
    .await;

    assert!(handle.set_visibility(Visibility::Hidden));
    // let the runtime apply the command before the address changes
    sleep(Duration::from_millis(100)).await;
    h.status.mark_unchanged();
    h.address.set([10, 9, 8, 7]);
    sleep(Duration::from_millis(300)).await;
    assert!(
        !h.status.has_changed().unwrap(),
        "stopped monitors must not publish"
    );
    assert_eq!(h.status.borrow().title, "QuineOS (u0_a7@192.168.1.42)");

    // showing again resumes with the new address
    assert!(handle.set_visibility(Visibility::Visible));
    wait_for_status(&mut h.status, |s| s.title == "QuineOS (u0_a7@10.9.8.7)").await;

    handle.shutdown().await;
}

#[tokio::test]
async fn health_result_landing_after_hide_is_discarded() {
    let (endpoint, hits) = serve_ok_after(Duration::from_millis(300)).await;
    let mut h = harness(RecordingLauncher::default(), CountingBackend::default());
    let settings = quine_runtime::app::RuntimeSettings {
        probe_timeouts: ProbeTimeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_secs(1),
        },
        ..fast_settings(endpoint)
    };

    let handle = spawn_runtime(settings, h.collaborators, Visibility::Visible);
    let in_flight = hits.clone();
    eventually(|| in_flight.load(Ordering::SeqCst) == 1).await;
    assert!(handle.set_visibility(Visibility::Hidden));

    // well past the moment the 200 is answered
    sleep(Duration::from_millis(700)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1, "no probe after hiding");
    assert_eq!(h.status.borrow_and_update().health, HealthState::Unknown);

    handle.shutdown().await;
}

#[tokio::test]
async fn missing_launch_target_is_reported_and_aborts_sequence() {
    let endpoint = refused_endpoint().await;
    let mut h = harness(RecordingLauncher::default(), CountingBackend::default());
    let settings = quine_runtime::app::RuntimeSettings {
        launch_steps: vec![
            LaunchStep::new(X11_TARGET, Duration::from_millis(10)),
            LaunchStep::new(CAMERA_TARGET, Duration::ZERO),
        ],
        ..fast_settings(endpoint)
    };

    let handle = spawn_runtime(settings, h.collaborators, Visibility::Hidden);

    let notice = next_notice(&mut h.notices).await;
    assert_eq!(
        notice,
        Notice::TargetNotFound {
            identifier: X11_TARGET.to_string()
        }
    );
    assert_eq!(notice.to_string(), "App not installed: com.termux.x11");
    assert_eq!(*h.launcher.attempts.lock().unwrap(), [X11_TARGET]);

    handle.shutdown().await;
}

#[tokio::test]
async fn launch_sequence_runs_in_order_once() {
    let endpoint = refused_endpoint().await;
    let launcher = RecordingLauncher {
        installed: vec![X11_TARGET.to_string(), CAMERA_TARGET.to_string()],
        ..RecordingLauncher::default()
    };
    let h = harness(launcher, CountingBackend::default());
    let settings = quine_runtime::app::RuntimeSettings {
        launch_steps: vec![
            LaunchStep::new(X11_TARGET, Duration::from_millis(100)),
            LaunchStep::new(CAMERA_TARGET, Duration::ZERO),
        ],
        ..fast_settings(endpoint)
    };

    let handle = spawn_runtime(settings, h.collaborators, Visibility::Visible);
    let launcher = h.launcher.clone();
    eventually(|| launcher.attempts.lock().unwrap().len() == 2).await;
    assert_eq!(
        *h.launcher.attempts.lock().unwrap(),
        [X11_TARGET, CAMERA_TARGET]
    );

    // visibility changes never re-run the sequence
    handle.set_visibility(Visibility::Hidden);
    handle.set_visibility(Visibility::Visible);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.launcher.attempts.lock().unwrap().len(), 2);
    assert_eq!(h.backend.registers.load(Ordering::SeqCst), 2);

    handle.shutdown().await;
}
