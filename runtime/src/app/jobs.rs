//! Work executed off the runtime task: the two periodic monitors and the launch sequence.
//!
//! Each piece reports back over the runtime's report channel; none of them
//! touches display state.

use alloc::sync::Arc;
use core::time::Duration;

use futures::FutureExt as _;
use tokio::{sync::mpsc, task};
use tracing::{Instrument as _, debug, error, warn};

use crate::{
    health::{HealthProbe, HealthState, ProbeTimeouts, check_health},
    identity::{AddressSource, DottedQuad, IdentityError, current_ipv4},
    launch::{LaunchError, LaunchStep, ProcessLauncher, run_sequence},
    scheduler::JobSpec,
};

pub const IP_JOB: &str = "ip-refresh";
pub const HEALTH_JOB: &str = "health-probe";

#[derive(Debug)]
pub(super) enum Report {
    Address {
        generation: u64,
        result: Result<DottedQuad, IdentityError>,
    },
    Health {
        generation: u64,
        state: HealthState,
    },
    Launch(Result<(), LaunchError>),
}

pub(super) type ReportTx = mpsc::UnboundedSender<Report>;
pub(super) type ReportRx = mpsc::UnboundedReceiver<Report>;

fn send(reports: &ReportTx, report: Report) {
    if reports.send(report).is_err() {
        debug!("Runtime gone, dropping report");
    }
}

/// Resolves the local address on the blocking pool.
pub(super) fn ip_refresh_job(
    interval: Duration,
    addresses: Arc<dyn AddressSource>,
    reports: ReportTx,
) -> JobSpec {
    JobSpec::new(IP_JOB, interval, move |ctx| {
        let addresses = addresses.clone();
        let reports = reports.clone();
        async move {
            match task::spawn_blocking(move || current_ipv4(addresses.as_ref())).await {
                Ok(result) => send(
                    &reports,
                    Report::Address {
                        generation: ctx.generation,
                        result,
                    },
                ),
                Err(e) => error!("Address lookup panicked: {e}"),
            }
        }
        .boxed()
    })
}

/// Probes the health endpoint, reusing one client across invocations.
pub(super) fn health_probe_job(
    interval: Duration,
    endpoint: String,
    timeouts: ProbeTimeouts,
    reports: ReportTx,
) -> JobSpec {
    let probe = HealthProbe::new(endpoint.clone(), timeouts)
        .inspect_err(|e| warn!(endpoint, error = ?e, "Falling back to one client per probe"))
        .ok();
    JobSpec::new(HEALTH_JOB, interval, move |ctx| {
        let probe = probe.clone();
        let endpoint = endpoint.clone();
        let reports = reports.clone();
        async move {
            let state = match probe {
                Some(probe) => probe.check().await,
                None => check_health(&endpoint, timeouts).await,
            };
            send(
                &reports,
                Report::Health {
                    generation: ctx.generation,
                    state,
                },
            );
        }
        .boxed()
    })
}

/// Runs the launch sequence once on the blocking pool.
pub(super) fn spawn_launch_sequence(
    launcher: Arc<dyn ProcessLauncher>,
    steps: Vec<LaunchStep>,
    reports: ReportTx,
) {
    tokio::spawn(
        async move {
            match task::spawn_blocking(move || run_sequence(launcher.as_ref(), &steps)).await {
                Ok(result) => send(&reports, Report::Launch(result)),
                Err(e) => error!("Launch sequence panicked: {e}"),
            }
        }
        .in_current_span(),
    );
}
