use core::sync::atomic::Ordering;

use quine_runtime::{
    advertiser::{FAILURE_ALREADY_ACTIVE, HTTP_SERVICE_NAME, SSH_SERVICE_NAME},
    app::{Visibility, spawn_runtime},
    status::Notice,
};

use crate::common::{
    CountingBackend, RecordingLauncher, eventually, fast_settings, harness, next_notice,
    refused_endpoint,
};

#[tokio::test]
async fn advertisements_are_withdrawn_on_shutdown() {
    let endpoint = refused_endpoint().await;
    let h = harness(RecordingLauncher::default(), CountingBackend::default());
    let backend = h.backend.clone();

    // advertising does not depend on visibility
    let handle = spawn_runtime(fast_settings(endpoint), h.collaborators, Visibility::Hidden);
    eventually(|| backend.registers.load(Ordering::SeqCst) == 2).await;
    assert_eq!(backend.unregisters.load(Ordering::SeqCst), 0);

    handle.shutdown().await;
    assert_eq!(backend.registers.load(Ordering::SeqCst), 2);
    assert_eq!(backend.unregisters.load(Ordering::SeqCst), 2);
    assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_advertisements_notify_once_and_skip_withdrawal() {
    let endpoint = refused_endpoint().await;
    let mut h = harness(
        RecordingLauncher::default(),
        CountingBackend {
            fail_with: Some(FAILURE_ALREADY_ACTIVE),
            ..CountingBackend::default()
        },
    );

    let handle = spawn_runtime(fast_settings(endpoint), h.collaborators, Visibility::Visible);

    let mut failed = vec![next_notice(&mut h.notices).await, next_notice(&mut h.notices).await];
    failed.sort_by_key(ToString::to_string);
    assert_eq!(
        failed,
        [
            Notice::AdvertisementFailed {
                name: HTTP_SERVICE_NAME.to_string(),
                code: FAILURE_ALREADY_ACTIVE,
            },
            Notice::AdvertisementFailed {
                name: SSH_SERVICE_NAME.to_string(),
                code: FAILURE_ALREADY_ACTIVE,
            },
        ]
    );

    handle.shutdown().await;
    assert_eq!(h.backend.registers.load(Ordering::SeqCst), 2, "no retries");
    assert_eq!(h.backend.unregisters.load(Ordering::SeqCst), 0);
    assert!(
        h.notices.try_recv().is_err(),
        "each failure is reported exactly once"
    );
}

#[tokio::test]
async fn disabled_advertising_registers_nothing() {
    let endpoint = refused_endpoint().await;
    let h = harness(RecordingLauncher::default(), CountingBackend::default());
    let settings = quine_runtime::app::RuntimeSettings {
        advertisements: Vec::new(),
        ..fast_settings(endpoint)
    };

    let handle = spawn_runtime(settings, h.collaborators, Visibility::Visible);
    handle.shutdown().await;
    assert_eq!(h.backend.registers.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.unregisters.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.shutdowns.load(Ordering::SeqCst), 1);
}
