//! Host-visible display state: title text, health indicator and notices.
//!
//! The runtime task is the only writer. Hosts implement [`StatusSink`] or use
//! [`WatchStatusSink`], which publishes a snapshot on a `watch` channel.

use alloc::sync::Arc;
use core::fmt;

use serde::Serialize;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{Instrument as _, debug, info, warn};

use crate::health::HealthState;

pub const DEFAULT_BRAND: &str = "QuineOS";

/// One-shot messages for the user, shown as toasts by the device UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    AdvertisementFailed { name: String, code: i32 },
    TargetNotFound { identifier: String },
    RequiredAppMissing { identifier: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::AdvertisementFailed { ref name, code } => {
                write!(f, "Service advertisement {name} failed (code {code})")
            }
            Self::TargetNotFound { ref identifier } => {
                write!(f, "App not installed: {identifier}")
            }
            Self::RequiredAppMissing { ref identifier } => write!(f, "{identifier} not found"),
        }
    }
}

/// Receives every externally observable effect of the runtime.
pub trait StatusSink: Send + 'static {
    fn set_title(&mut self, text: &str);
    fn set_health_indicator(&mut self, state: HealthState);
    fn notify(&mut self, notice: &Notice);
}

/// Renders the title bar text: `QuineOS (u0_a123@192.168.1.42)`.
///
/// The account id is an opaque decoration supplied by the host.
#[must_use]
pub fn format_title(brand: &str, account_id: u32, address: &str) -> String {
    format!("{brand} (u0_a{account_id}@{address})")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub title: String,
    pub health: HealthState,
}

pub type StatusRx = watch::Receiver<Arc<StatusSnapshot>>;
pub type NoticeRx = broadcast::Receiver<Notice>;

/// Publishes display state on channels so any number of observers can render it.
#[derive(Debug)]
pub struct WatchStatusSink {
    status_tx: watch::Sender<Arc<StatusSnapshot>>,
    notice_tx: broadcast::Sender<Notice>,
}

impl WatchStatusSink {
    #[must_use]
    pub fn new() -> (Self, StatusRx) {
        let (status_tx, status_rx) = watch::channel(Arc::new(StatusSnapshot::default()));
        let (notice_tx, _) = broadcast::channel(16);
        (
            Self {
                status_tx,
                notice_tx,
            },
            status_rx,
        )
    }

    #[must_use]
    pub fn subscribe_notices(&self) -> NoticeRx {
        self.notice_tx.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot) -> bool) {
        self.status_tx.send_if_modified(|current| {
            let mut next = current.as_ref().clone();
            let changed = f(&mut next);
            if changed {
                *current = Arc::new(next);
            }
            changed
        });
    }
}

impl StatusSink for WatchStatusSink {
    fn set_title(&mut self, text: &str) {
        self.update(|status| {
            if status.title == text {
                return false;
            }
            text.clone_into(&mut status.title);
            true
        });
    }

    fn set_health_indicator(&mut self, state: HealthState) {
        self.update(|status| {
            if status.health == state {
                return false;
            }
            status.health = state;
            true
        });
    }

    fn notify(&mut self, notice: &Notice) {
        // nobody listening is fine, the runtime logs notices as well
        drop(self.notice_tx.send(notice.clone()));
    }
}

/// Logs every published status change and notice until the sink is dropped.
pub fn spawn_status_logger(mut status: StatusRx, mut notices: NoticeRx) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = status.borrow_and_update().clone();
                        info!(
                            title = %snapshot.title,
                            health = %snapshot.health,
                            indicator = snapshot.health.indicator_color(),
                            "Status updated"
                        );
                    }
                    notice = notices.recv() => match notice {
                        Ok(notice) => warn!(%notice, "Notice"),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Notice logger lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
        .in_current_span(),
    )
}
