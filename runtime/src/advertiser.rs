//! DNS-SD service advertisement.
//!
//! The [`ServiceAdvertiser`] keeps the registration state table and is owned by
//! the runtime task. Backend calls may block, so they are queued to a single
//! worker task that executes them in request order on the blocking pool. Their
//! outcomes come back as [`AdvertisementEvent`]s over a channel; state only
//! changes when the owner feeds those events to [`ServiceAdvertiser::apply`].

use alloc::sync::Arc;
use core::{fmt, time::Duration};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use mdns_sd::{ServiceDaemon, ServiceInfo, UnregisterStatus};
use thiserror::Error as ThisError;
use tokio::{
    sync::{mpsc, oneshot},
    task::{self, JoinHandle},
};
use tracing::{Instrument as _, debug, error, info, warn};

use crate::status::Notice;

pub const SSH_SERVICE_NAME: &str = "quineOS-ssh";
pub const SSH_SERVICE_TYPE: &str = "_ssh._tcp.";
pub const HTTP_SERVICE_NAME: &str = "quineOS-http";
pub const HTTP_SERVICE_TYPE: &str = "_http._tcp.";
pub const DEFAULT_SERVICE_PORT: u16 = 80;
pub const DEFAULT_HOST_NAME: &str = "quineos.local.";

// Failure codes reported by DNS-SD backends.
pub const FAILURE_INTERNAL_ERROR: i32 = 0;
pub const FAILURE_ALREADY_ACTIVE: i32 = 3;
pub const FAILURE_MAX_LIMIT: i32 = 4;

const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAdvertisement {
    pub name: String,
    /// DNS-SD service type such as `_ssh._tcp.`.
    pub service_type: String,
    pub port: u16,
}

impl ServiceAdvertisement {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            port,
        }
    }
}

/// The SSH and HTTP advertisements every device publishes.
#[must_use]
pub fn default_advertisements(port: u16) -> Vec<ServiceAdvertisement> {
    vec![
        ServiceAdvertisement::new(SSH_SERVICE_NAME, SSH_SERVICE_TYPE, port),
        ServiceAdvertisement::new(HTTP_SERVICE_NAME, HTTP_SERVICE_TYPE, port),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Failed(i32),
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct AdvertisementFailure {
    pub code: i32,
    pub message: String,
}

impl AdvertisementFailure {
    pub fn internal(message: impl fmt::Display) -> Self {
        Self {
            code: FAILURE_INTERNAL_ERROR,
            message: message.to_string(),
        }
    }
}

/// Local service-discovery backend. Calls may block.
pub trait AdvertisementBackend: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns the backend's failure code if the service cannot be registered.
    fn register(&self, advertisement: &ServiceAdvertisement) -> Result<(), AdvertisementFailure>;

    /// # Errors
    ///
    /// Returns the backend's failure code if the service cannot be unregistered.
    fn unregister(&self, advertisement: &ServiceAdvertisement)
    -> Result<(), AdvertisementFailure>;

    /// Releases backend resources after all withdrawals.
    fn shutdown(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisementEventKind {
    Registered,
    Failed(i32),
    Unregistered,
    UnregisterFailed(i32),
}

/// Outcome of a backend call, keyed by advertisement name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    pub name: String,
    pub kind: AdvertisementEventKind,
}

pub type AdvertisementEventTx = mpsc::UnboundedSender<AdvertisementEvent>;
pub type AdvertisementEventRx = mpsc::UnboundedReceiver<AdvertisementEvent>;

enum BackendCommand {
    Register(ServiceAdvertisement),
    Unregister(ServiceAdvertisement),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug)]
struct Slot {
    advertisement: ServiceAdvertisement,
    state: RegistrationState,
    /// An unregister request is queued and not yet answered.
    withdrawing: bool,
}

pub struct ServiceAdvertiser {
    slots: HashMap<String, Slot>,
    commands: mpsc::UnboundedSender<BackendCommand>,
    worker: JoinHandle<()>,
}

impl fmt::Debug for ServiceAdvertiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAdvertiser")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl ServiceAdvertiser {
    /// Creates the advertiser and its backend worker. Must be called within a tokio runtime.
    pub fn spawn(backend: Arc<dyn AdvertisementBackend>, events: AdvertisementEventTx) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_backend(backend, commands_rx, events).in_current_span());
        Self {
            slots: HashMap::new(),
            commands,
            worker,
        }
    }

    fn send(&self, command: BackendCommand) {
        if self.commands.send(command).is_err() {
            error!("Advertisement backend worker is gone");
        }
    }

    /// Requests registration. Each name is attempted at most once per advertiser;
    /// repeated calls, including after a failure, issue no backend request.
    ///
    /// Returns whether a backend request was issued.
    pub fn advertise(&mut self, advertisement: ServiceAdvertisement) -> bool {
        if let Some(slot) = self.slots.get(&advertisement.name) {
            debug!(
                name = %advertisement.name,
                state = ?slot.state,
                "Advertisement already attempted, not registering again"
            );
            return false;
        }
        info!(
            name = %advertisement.name,
            service_type = %advertisement.service_type,
            port = advertisement.port,
            "Registering service advertisement"
        );
        self.slots.insert(
            advertisement.name.clone(),
            Slot {
                advertisement: advertisement.clone(),
                state: RegistrationState::Registering,
                withdrawing: false,
            },
        );
        self.send(BackendCommand::Register(advertisement));
        true
    }

    /// Requests unregistration. Only issued for registering or registered
    /// advertisements, and only once until the backend answers.
    ///
    /// Returns whether a backend request was issued.
    pub fn withdraw(&mut self, name: &str) -> bool {
        let Some(slot) = self.slots.get_mut(name) else {
            return false;
        };
        match slot.state {
            RegistrationState::Registering | RegistrationState::Registered
                if !slot.withdrawing =>
            {
                slot.withdrawing = true;
                let advertisement = slot.advertisement.clone();
                info!(name, "Withdrawing service advertisement");
                self.send(BackendCommand::Unregister(advertisement));
                true
            }
            RegistrationState::Failed(code) => {
                debug!(name, code, "Withdrawing failed advertisement is a no-op");
                slot.state = RegistrationState::Unregistered;
                false
            }
            RegistrationState::Registering
            | RegistrationState::Registered
            | RegistrationState::Unregistered => false,
        }
    }

    pub fn withdraw_all(&mut self) {
        let names: Vec<_> = self.slots.keys().cloned().collect();
        for name in names {
            self.withdraw(&name);
        }
    }

    /// Applies a backend outcome. Returns a notice when the user should be told.
    pub fn apply(&mut self, event: &AdvertisementEvent) -> Option<Notice> {
        let Some(slot) = self.slots.get_mut(&event.name) else {
            debug!(name = %event.name, "Event for unknown advertisement");
            return None;
        };
        match event.kind {
            AdvertisementEventKind::Registered => {
                if slot.state == RegistrationState::Registering {
                    slot.state = RegistrationState::Registered;
                    info!(name = %event.name, "Service advertisement registered");
                }
                None
            }
            AdvertisementEventKind::Failed(code) => {
                error!(name = %event.name, code, "Service advertisement failed");
                slot.state = RegistrationState::Failed(code);
                Some(Notice::AdvertisementFailed {
                    name: event.name.clone(),
                    code,
                })
            }
            AdvertisementEventKind::Unregistered => {
                info!(name = %event.name, "Service advertisement unregistered");
                slot.state = RegistrationState::Unregistered;
                slot.withdrawing = false;
                None
            }
            AdvertisementEventKind::UnregisterFailed(code) => {
                warn!(name = %event.name, code, "Service advertisement failed to unregister");
                slot.withdrawing = false;
                if let RegistrationState::Failed(_) = slot.state {
                    slot.state = RegistrationState::Unregistered;
                }
                None
            }
        }
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<RegistrationState> {
        self.slots.get(name).map(|slot| slot.state)
    }

    /// Number of withdrawals still waiting for the backend.
    #[must_use]
    pub fn pending_withdrawals(&self) -> usize {
        self.slots.values().filter(|slot| slot.withdrawing).count()
    }

    /// Shuts the backend down after every queued request has been executed.
    pub async fn shutdown(self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(BackendCommand::Shutdown(done_tx));
        if done_rx.await.is_err() {
            warn!("Advertisement backend worker ended before shutdown");
        }
        if let Err(e) = self.worker.await {
            error!("Advertisement backend worker panicked: {e}");
        }
    }
}

/// Executes backend calls one at a time, in request order.
async fn run_backend(
    backend: Arc<dyn AdvertisementBackend>,
    mut commands: mpsc::UnboundedReceiver<BackendCommand>,
    events: AdvertisementEventTx,
) {
    while let Some(command) = commands.recv().await {
        let (name, kind) = match command {
            BackendCommand::Register(advertisement) => {
                let name = advertisement.name.clone();
                let backend = backend.clone();
                let kind = match task::spawn_blocking(move || backend.register(&advertisement))
                    .await
                {
                    Ok(Ok(())) => AdvertisementEventKind::Registered,
                    Ok(Err(failure)) => {
                        debug!(name, %failure, "Backend rejected registration");
                        AdvertisementEventKind::Failed(failure.code)
                    }
                    Err(e) => {
                        error!(name, "Registration call panicked: {e}");
                        AdvertisementEventKind::Failed(FAILURE_INTERNAL_ERROR)
                    }
                };
                (name, kind)
            }
            BackendCommand::Unregister(advertisement) => {
                let name = advertisement.name.clone();
                let backend = backend.clone();
                let kind = match task::spawn_blocking(move || backend.unregister(&advertisement))
                    .await
                {
                    Ok(Ok(())) => AdvertisementEventKind::Unregistered,
                    Ok(Err(failure)) => {
                        debug!(name, %failure, "Backend rejected unregistration");
                        AdvertisementEventKind::UnregisterFailed(failure.code)
                    }
                    Err(e) => {
                        error!(name, "Unregistration call panicked: {e}");
                        AdvertisementEventKind::UnregisterFailed(FAILURE_INTERNAL_ERROR)
                    }
                };
                (name, kind)
            }
            BackendCommand::Shutdown(done) => {
                let backend = backend.clone();
                if let Err(e) = task::spawn_blocking(move || backend.shutdown()).await {
                    error!("Backend shutdown panicked: {e}");
                }
                if done.send(()).is_err() {
                    debug!("Shutdown requester went away");
                }
                break;
            }
        };
        if events.send(AdvertisementEvent { name, kind }).is_err() {
            debug!("Advertisement event receiver dropped");
        }
    }
}

/// Qualifies `_ssh._tcp.` style types into the `.local.` domain.
fn qualify_service_type(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{trimmed}.")
    } else {
        format!("{trimmed}.local.")
    }
}

/// Multicast DNS responder from the `mdns-sd` crate.
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    host_name: String,
    /// Advertisement name → registered DNS-SD full name.
    registered: Mutex<HashMap<String, String>>,
}

impl fmt::Debug for MdnsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdnsBackend")
            .field("host_name", &self.host_name)
            .finish_non_exhaustive()
    }
}

impl MdnsBackend {
    /// Starts the responder daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the multicast sockets cannot be set up.
    pub fn new(host_name: impl Into<String>) -> Result<Self, AdvertisementFailure> {
        let daemon = ServiceDaemon::new().map_err(AdvertisementFailure::internal)?;
        Ok(Self {
            daemon,
            host_name: host_name.into(),
            registered: Mutex::default(),
        })
    }

    fn registered(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.registered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AdvertisementBackend for MdnsBackend {
    fn register(&self, advertisement: &ServiceAdvertisement) -> Result<(), AdvertisementFailure> {
        if self.registered().contains_key(&advertisement.name) {
            return Err(AdvertisementFailure {
                code: FAILURE_ALREADY_ACTIVE,
                message: format!("{} is already registered", advertisement.name),
            });
        }
        let info = ServiceInfo::new(
            &qualify_service_type(&advertisement.service_type),
            &advertisement.name,
            &self.host_name,
            "",
            advertisement.port,
            HashMap::<String, String>::new(),
        )
        .map_err(AdvertisementFailure::internal)?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(AdvertisementFailure::internal)?;
        debug!(fullname, "Registered with mDNS responder");
        self.registered()
            .insert(advertisement.name.clone(), fullname);
        Ok(())
    }

    fn unregister(
        &self,
        advertisement: &ServiceAdvertisement,
    ) -> Result<(), AdvertisementFailure> {
        let Some(fullname) = self.registered().remove(&advertisement.name) else {
            return Err(AdvertisementFailure::internal(format!(
                "{} is not registered",
                advertisement.name
            )));
        };
        let status = self
            .daemon
            .unregister(&fullname)
            .map_err(AdvertisementFailure::internal)?;
        match status.recv_timeout(UNREGISTER_TIMEOUT) {
            Ok(UnregisterStatus::OK) => Ok(()),
            Ok(_) => Err(AdvertisementFailure::internal(format!(
                "{fullname} unknown to the responder"
            ))),
            Err(e) => Err(AdvertisementFailure::internal(format!(
                "no unregister confirmation for {fullname}: {e}"
            ))),
        }
    }

    fn shutdown(&self) {
        match self.daemon.shutdown() {
            Ok(status) => {
                if let Err(e) = status.recv_timeout(UNREGISTER_TIMEOUT) {
                    debug!("mDNS responder did not confirm shutdown: {e}");
                }
            }
            Err(e) => warn!("Failed to shut down mDNS responder: {e}"),
        }
    }
}

/// Stands in when no responder could be started; every registration fails.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    pub reason: String,
}

impl AdvertisementBackend for UnavailableBackend {
    fn register(&self, _: &ServiceAdvertisement) -> Result<(), AdvertisementFailure> {
        Err(AdvertisementFailure::internal(&self.reason))
    }

    fn unregister(&self, _: &ServiceAdvertisement) -> Result<(), AdvertisementFailure> {
        Err(AdvertisementFailure::internal(&self.reason))
    }
}
