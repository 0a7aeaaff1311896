//! Common utilities for integration tests.
//!
//! Fake collaborators for the runtime and a minimal HTTP endpoint to probe.

use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
    time::Duration,
};
use std::sync::Mutex;

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpListener,
    sync::broadcast,
    time::{sleep, timeout},
};

use quine_runtime::{
    advertiser::{AdvertisementBackend, AdvertisementFailure, ServiceAdvertisement},
    app::{Collaborators, RuntimeSettings},
    health::ProbeTimeouts,
    identity::{AddressSource, DottedQuad},
    launch::ProcessLauncher,
    status::{Notice, NoticeRx, StatusRx, StatusSnapshot, WatchStatusSink},
};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Address source whose answer can be changed while the runtime runs.
#[derive(Debug, Default)]
pub(crate) struct SettableAddress(AtomicU32);

impl SettableAddress {
    pub(crate) fn set(&self, octets: [u8; 4]) {
        self.0
            .store(DottedQuad::pack(octets.into()), Ordering::SeqCst);
    }
}

impl AddressSource for SettableAddress {
    fn packed_ipv4(&self) -> Option<u32> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

/// Resolves only the listed identifiers and records every attempt.
#[derive(Debug, Default)]
pub(crate) struct RecordingLauncher {
    pub installed: Vec<String>,
    pub attempts: Mutex<Vec<String>>,
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, identifier: &str) -> bool {
        self.attempts.lock().unwrap().push(identifier.to_string());
        self.installed.iter().any(|known| known == identifier)
    }
}

#[derive(Debug, Default)]
pub(crate) struct CountingBackend {
    pub fail_with: Option<i32>,
    pub registers: AtomicUsize,
    pub unregisters: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl AdvertisementBackend for CountingBackend {
    fn register(&self, _: &ServiceAdvertisement) -> Result<(), AdvertisementFailure> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(code) => Err(AdvertisementFailure {
                code,
                message: "rejected by test backend".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn unregister(&self, _: &ServiceAdvertisement) -> Result<(), AdvertisementFailure> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything a test needs to observe a runtime.
pub(crate) struct Harness {
    pub collaborators: Collaborators,
    pub status: StatusRx,
    pub notices: NoticeRx,
    pub address: Arc<SettableAddress>,
    pub launcher: Arc<RecordingLauncher>,
    pub backend: Arc<CountingBackend>,
}

pub(crate) fn harness(launcher: RecordingLauncher, backend: CountingBackend) -> Harness {
    let (sink, status) = WatchStatusSink::new();
    let notices = sink.subscribe_notices();
    let address = Arc::new(SettableAddress::default());
    let launcher = Arc::new(launcher);
    let backend = Arc::new(backend);
    Harness {
        collaborators: Collaborators {
            sink: Box::new(sink),
            addresses: address.clone(),
            launcher: launcher.clone(),
            advertisement_backend: backend.clone(),
        },
        status,
        notices,
        address,
        launcher,
        backend,
    }
}

/// Fast-ticking settings against `endpoint`, without launch steps.
pub(crate) fn fast_settings(endpoint: String) -> RuntimeSettings {
    RuntimeSettings {
        account_id: 7,
        ip_refresh_interval: Duration::from_millis(50),
        health_poll_interval: Duration::from_millis(50),
        teardown_grace: Duration::from_secs(1),
        health_endpoint: endpoint,
        probe_timeouts: ProbeTimeouts {
            connect: Duration::from_millis(300),
            read: Duration::from_millis(300),
        },
        launch_steps: Vec::new(),
        ..RuntimeSettings::default()
    }
}

/// Answers every request with `200 OK` and returns the probe URL.
pub(crate) async fn serve_ok() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0_u8; 1024];
                drop(stream.read(&mut buf).await);
                drop(
                    stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
                        .await,
                );
            });
        }
    });
    format!("http://{addr}/_ping")
}

/// Like [`serve_ok`], but answers only after `delay`. Counts accepted requests.
pub(crate) async fn serve_ok_after(delay: Duration) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0_u8; 1024];
                drop(stream.read(&mut buf).await);
                sleep(delay).await;
                drop(
                    stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
                        .await,
                );
            });
        }
    });
    (format!("http://{addr}/_ping"), hits)
}

/// A URL on a port nobody listens on.
pub(crate) async fn refused_endpoint() -> String {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    format!("http://127.0.0.1:{port}/_ping")
}

pub(crate) async fn wait_for_status<F>(status: &mut StatusRx, mut predicate: F) -> StatusSnapshot
where
    F: FnMut(&StatusSnapshot) -> bool,
{
    let snapshot = timeout(WAIT, status.wait_for(|snapshot| predicate(snapshot)))
        .await
        .expect("timed out waiting for status")
        .expect("status sink dropped")
        .as_ref()
        .clone();
    snapshot
}

pub(crate) async fn next_notice(notices: &mut NoticeRx) -> Notice {
    match timeout(WAIT, notices.recv()).await {
        Ok(Ok(notice)) => notice,
        Ok(Err(broadcast::error::RecvError::Lagged(n))) => panic!("missed {n} notices"),
        Ok(Err(broadcast::error::RecvError::Closed)) => panic!("notice channel closed"),
        Err(_) => panic!("timed out waiting for notice"),
    }
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        sleep(Duration::from_millis(10)).await;
    }
}
