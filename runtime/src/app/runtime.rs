//! The owning runtime task.
//!
//! A single task holds the scheduler, the advertisement table and the status
//! sink. Host commands, job reports and advertisement events all arrive on
//! channels and are applied here one at a time, so display state has exactly
//! one writer.

use alloc::sync::Arc;
use core::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, timeout, timeout_at},
};
use tracing::{Instrument as _, debug, error, info, warn};

use super::jobs::{
    HEALTH_JOB, IP_JOB, Report, ReportRx, ReportTx, health_probe_job, ip_refresh_job,
    spawn_launch_sequence,
};
use crate::{
    advertiser::{
        AdvertisementBackend, AdvertisementEvent, AdvertisementEventRx, ServiceAdvertisement,
        ServiceAdvertiser,
    },
    config::LauncherConfig,
    health::ProbeTimeouts,
    identity::{AddressSource, display_address},
    launch::{LaunchError, LaunchStep, ProcessLauncher},
    scheduler::PeriodicScheduler,
    status::{Notice, StatusSink, format_title},
};

/// Tunables of the runtime, usually derived from the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub brand: String,
    pub account_id: u32,
    pub ip_refresh_interval: Duration,
    pub health_poll_interval: Duration,
    pub teardown_grace: Duration,
    pub health_endpoint: String,
    pub probe_timeouts: ProbeTimeouts,
    pub advertisements: Vec<ServiceAdvertisement>,
    pub launch_steps: Vec<LaunchStep>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        LauncherConfig::default().runtime_settings()
    }
}

/// The host-provided pieces the runtime drives.
pub struct Collaborators {
    pub sink: Box<dyn StatusSink>,
    pub addresses: Arc<dyn AddressSource>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub advertisement_backend: Arc<dyn AdvertisementBackend>,
}

/// Whether the host is in the foreground. Monitoring only runs while visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug)]
enum HostCommand {
    Visibility(Visibility),
    Shutdown,
}

/// Cloneable sender for visibility changes.
#[derive(Debug, Clone)]
pub struct VisibilityControl {
    commands: mpsc::UnboundedSender<HostCommand>,
}

impl VisibilityControl {
    /// Returns `false` once the runtime has stopped.
    pub fn set(&self, visibility: Visibility) -> bool {
        self.commands
            .send(HostCommand::Visibility(visibility))
            .is_ok()
    }
}

/// Owner's handle to a running runtime.
///
/// The runtime also shuts down once this handle and every [`VisibilityControl`] are dropped.
#[derive(Debug)]
pub struct RuntimeHandle {
    control: VisibilityControl,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub fn set_visibility(&self, visibility: Visibility) -> bool {
        self.control.set(visibility)
    }

    #[must_use]
    pub fn visibility_control(&self) -> VisibilityControl {
        self.control.clone()
    }

    /// Stops all jobs, withdraws advertisements and waits for the runtime task to end.
    pub async fn shutdown(self) {
        if self.control.commands.send(HostCommand::Shutdown).is_err() {
            debug!("Runtime already stopped");
        }
        if let Err(e) = self.task.await {
            error!("Runtime task ended abnormally: {e}");
        }
    }
}

/// Starts the runtime: registers advertisements, launches the start-up
/// sequence and, if `initial` is visible, starts the monitors.
///
/// Must be called within a tokio runtime.
pub fn spawn_runtime(
    settings: RuntimeSettings,
    collaborators: Collaborators,
    initial: Visibility,
) -> RuntimeHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (reports_tx, reports_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(
        async move {
            let runtime = Runtime::new(settings, collaborators, &reports_tx, events_tx);
            runtime
                .run(initial, commands_rx, reports_tx, reports_rx, events_rx)
                .await;
        }
        .in_current_span(),
    );

    RuntimeHandle {
        control: VisibilityControl {
            commands: commands_tx,
        },
        task,
    }
}

struct Runtime {
    settings: RuntimeSettings,
    sink: Box<dyn StatusSink>,
    scheduler: PeriodicScheduler,
    advertiser: ServiceAdvertiser,
    launcher: Arc<dyn ProcessLauncher>,
    visibility: Option<Visibility>,
}

impl Runtime {
    fn new(
        settings: RuntimeSettings,
        collaborators: Collaborators,
        reports: &ReportTx,
        events: mpsc::UnboundedSender<AdvertisementEvent>,
    ) -> Self {
        let mut scheduler = PeriodicScheduler::new();
        for spec in [
            ip_refresh_job(
                settings.ip_refresh_interval,
                collaborators.addresses,
                reports.clone(),
            ),
            health_probe_job(
                settings.health_poll_interval,
                settings.health_endpoint.clone(),
                settings.probe_timeouts,
                reports.clone(),
            ),
        ] {
            if let Err(e) = scheduler.register(spec) {
                error!("Failed to register job: {e}");
            }
        }

        Self {
            advertiser: ServiceAdvertiser::spawn(collaborators.advertisement_backend, events),
            sink: collaborators.sink,
            launcher: collaborators.launcher,
            scheduler,
            settings,
            visibility: None,
        }
    }

    async fn run(
        mut self,
        initial: Visibility,
        mut commands: mpsc::UnboundedReceiver<HostCommand>,
        reports_tx: ReportTx,
        mut reports: ReportRx,
        mut events: AdvertisementEventRx,
    ) {
        info!("Runtime starting");
        for advertisement in self.settings.advertisements.clone() {
            self.advertiser.advertise(advertisement);
        }
        if self.settings.launch_steps.is_empty() {
            debug!("No launch steps configured");
        } else {
            spawn_launch_sequence(
                self.launcher.clone(),
                self.settings.launch_steps.clone(),
                reports_tx,
            );
        }
        self.set_visibility(initial);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(HostCommand::Visibility(visibility)) => self.set_visibility(visibility),
                    Some(HostCommand::Shutdown) | None => break,
                },
                Some(report) = reports.recv() => self.apply_report(report),
                Some(event) = events.recv() => self.apply_advertisement_event(&event),
            }
        }

        self.teardown(&mut events).await;
    }

    fn set_visibility(&mut self, visibility: Visibility) {
        if self.visibility == Some(visibility) {
            debug!(?visibility, "Visibility unchanged");
            return;
        }
        info!(?visibility, "Visibility changed");
        self.visibility = Some(visibility);
        match visibility {
            Visibility::Visible => self.scheduler.start_all(),
            Visibility::Hidden => self.scheduler.stop_all(),
        }
    }

    fn apply_report(&mut self, report: Report) {
        match report {
            Report::Address { generation, result } => {
                if !self.scheduler.is_current(IP_JOB, generation) {
                    debug!(generation, "Discarding stale address result");
                    return;
                }
                let title = format_title(
                    &self.settings.brand,
                    self.settings.account_id,
                    &display_address(result),
                );
                debug!(title, "Updating title");
                self.sink.set_title(&title);
            }
            Report::Health { generation, state } => {
                if !self.scheduler.is_current(HEALTH_JOB, generation) {
                    debug!(generation, "Discarding stale health result");
                    return;
                }
                debug!(%state, "Updating health indicator");
                self.sink.set_health_indicator(state);
            }
            Report::Launch(Ok(())) => info!("Launch sequence completed"),
            Report::Launch(Err(LaunchError::TargetNotFound(identifier))) => {
                self.notify(&Notice::TargetNotFound { identifier });
            }
        }
    }

    fn apply_advertisement_event(&mut self, event: &AdvertisementEvent) {
        if let Some(notice) = self.advertiser.apply(event) {
            self.notify(&notice);
        }
    }

    fn notify(&mut self, notice: &Notice) {
        warn!(%notice, "Notifying user");
        self.sink.notify(notice);
    }

    async fn teardown(mut self, events: &mut AdvertisementEventRx) {
        info!("Runtime shutting down");
        self.scheduler.stop_all();
        self.advertiser.withdraw_all();

        let deadline = Instant::now() + self.settings.teardown_grace;
        while self.advertiser.pending_withdrawals() > 0 {
            match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => self.apply_advertisement_event(&event),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = self.advertiser.pending_withdrawals(),
                        "Timed out withdrawing advertisements"
                    );
                    break;
                }
            }
        }

        if timeout_at(deadline, self.scheduler.drain()).await.is_err() {
            warn!("Jobs still running at shutdown, aborting them");
            self.scheduler.abort_draining();
        }

        if timeout(self.settings.teardown_grace, self.advertiser.shutdown())
            .await
            .is_err()
        {
            warn!("Advertisement backend did not shut down in time");
        }
        info!("Runtime stopped");
    }
}
