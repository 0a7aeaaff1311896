//! Cooperative scheduler for a small fixed set of named recurring jobs.
//!
//! Every job is driven by its own task that runs the action, waits for it to
//! complete and only then sleeps for the job's interval. A slow action delays
//! the next firing (drift) but two invocations of the same job never overlap,
//! not even across a `stop` → `start` cycle: each job owns a run lock that a
//! restarted driver has to acquire before its first invocation.
//!
//! The scheduler itself is owned by a single context and is not `Sync`-shared;
//! `start`/`stop` are synchronous and return immediately.

use alloc::sync::Arc;
use core::{fmt, time::Duration};
use std::collections::HashMap;

use futures::future::BoxFuture;
use thiserror::Error as ThisError;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{Instrument as _, debug, trace};

/// Handed to each invocation so results can be matched against the run that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    pub generation: u64,
}

pub type JobAction = Arc<dyn Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Static description of a recurring job.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub interval: Duration,
    pub action: JobAction,
}

impl JobSpec {
    pub fn new<F>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn(JobContext) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            action: Arc::new(action),
        }
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Never started.
    Idle,
    /// Waiting for its next firing.
    Scheduled,
    Running,
    /// Cancelled; an invocation that was running may still be draining.
    Stopped,
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no job named '{0}'")]
    UnknownJob(String),
    #[error("a job named '{0}' is already registered")]
    DuplicateJob(String),
    #[error("job '{0}' has a zero interval")]
    ZeroInterval(String),
}

/// State shared between a job slot and its driver tasks.
struct JobShared {
    /// Held for the duration of every invocation.
    run_lock: Arc<Mutex<()>>,
    phase: watch::Sender<JobPhase>,
    last_run: watch::Sender<Option<Instant>>,
    /// Generation whose driver is allowed to publish phase changes.
    live_generation: watch::Sender<u64>,
}

impl JobShared {
    fn set_phase(&self, generation: u64, phase: JobPhase) {
        // `stop` cannot publish generation 0 while the guard is held
        let live = self.live_generation.borrow();
        if *live == generation {
            self.phase.send_replace(phase);
        }
        drop(live);
    }
}

struct ActiveRun {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct JobSlot {
    spec: JobSpec,
    generation: u64,
    active: Option<ActiveRun>,
    draining: Vec<JoinHandle<()>>,
    shared: Arc<JobShared>,
}

#[derive(Default)]
pub struct PeriodicScheduler {
    jobs: HashMap<String, JobSlot>,
    /// Registration order, used by `start_all` / `stop_all`.
    order: Vec<String>,
}

impl fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("jobs", &self.order)
            .finish()
    }
}

impl PeriodicScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job in the `Idle` phase.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateJob`] if the name is taken and
    /// [`SchedulerError::ZeroInterval`] for a job that would never yield.
    pub fn register(&mut self, spec: JobSpec) -> Result<(), SchedulerError> {
        if self.jobs.contains_key(&spec.name) {
            return Err(SchedulerError::DuplicateJob(spec.name));
        }
        if spec.interval.is_zero() {
            return Err(SchedulerError::ZeroInterval(spec.name));
        }
        let shared = Arc::new(JobShared {
            run_lock: Arc::new(Mutex::new(())),
            phase: watch::Sender::new(JobPhase::Idle),
            last_run: watch::Sender::new(None),
            live_generation: watch::Sender::new(0),
        });
        self.order.push(spec.name.clone());
        self.jobs.insert(
            spec.name.clone(),
            JobSlot {
                spec,
                generation: 0,
                active: None,
                draining: Vec::new(),
                shared,
            },
        );
        Ok(())
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut JobSlot, SchedulerError> {
        self.jobs
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    /// Starts a job with an immediate first firing. No-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownJob`] for unregistered names.
    pub fn start(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        if slot
            .active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
        {
            trace!(job = name, "Job already active");
            return Ok(());
        }

        slot.generation += 1;
        let generation = slot.generation;
        let (stop_tx, stop_rx) = watch::channel(false);
        slot.shared.live_generation.send_replace(generation);
        slot.shared.phase.send_replace(JobPhase::Scheduled);

        let task = tokio::spawn(
            drive(slot.spec.clone(), generation, stop_rx, slot.shared.clone()).in_current_span(),
        );
        slot.active = Some(ActiveRun { stop_tx, task });
        slot.draining.retain(|handle| !handle.is_finished());
        debug!(job = name, generation, "Job started");
        Ok(())
    }

    /// Stops a job. The pending timer is cancelled before this returns; an
    /// invocation already running finishes but is not re-armed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownJob`] for unregistered names.
    pub fn stop(&mut self, name: &str) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(name)?;
        let Some(active) = slot.active.take() else {
            return Ok(());
        };
        active.stop_tx.send_replace(true);
        // no driver may publish phases any more
        slot.shared.live_generation.send_replace(0);
        slot.shared.phase.send_replace(JobPhase::Stopped);
        if !active.task.is_finished() {
            slot.draining.push(active.task);
        }
        debug!(job = name, generation = slot.generation, "Job stopped");
        Ok(())
    }

    pub fn start_all(&mut self) {
        for name in self.order.clone() {
            // names come from `order`, so they are registered
            drop(self.start(&name));
        }
    }

    pub fn stop_all(&mut self) {
        for name in self.order.clone() {
            drop(self.stop(&name));
        }
    }

    /// Waits for invocations that were still running when their job was stopped.
    ///
    /// Cancel-safe: handles are only released once they completed, so a
    /// timed-out drain can be followed by [`Self::abort_draining`].
    pub async fn drain(&mut self) {
        for slot in self.jobs.values_mut() {
            while let Some(handle) = slot.draining.last_mut() {
                if let Err(e) = handle.await {
                    debug!(job = %slot.spec.name, "Job driver ended abnormally: {e}");
                }
                slot.draining.pop();
            }
        }
    }

    /// Aborts invocations still draining. Their results are discarded anyway.
    pub fn abort_draining(&mut self) {
        for slot in self.jobs.values_mut() {
            for handle in slot.draining.drain(..) {
                handle.abort();
            }
        }
    }

    /// Whether a result tagged with `generation` still belongs to an active run of `name`.
    #[must_use]
    pub fn is_current(&self, name: &str, generation: u64) -> bool {
        self.jobs
            .get(name)
            .is_some_and(|slot| slot.active.is_some() && slot.generation == generation)
    }

    #[must_use]
    pub fn phase(&self, name: &str) -> Option<JobPhase> {
        self.jobs.get(name).map(|slot| *slot.shared.phase.borrow())
    }

    /// Completion time of the job's latest invocation.
    #[must_use]
    pub fn last_run(&self, name: &str) -> Option<Instant> {
        self.jobs
            .get(name)
            .and_then(|slot| *slot.shared.last_run.borrow())
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        for slot in self.jobs.values_mut() {
            if let Some(active) = slot.active.take() {
                active.stop_tx.send_replace(true);
            }
        }
    }
}

/// Driver loop of one started job.
async fn drive(
    spec: JobSpec,
    generation: u64,
    mut stop_rx: watch::Receiver<bool>,
    shared: Arc<JobShared>,
) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = stop_rx.wait_for(|&stopped| stopped) => break,
            permit = shared.run_lock.clone().lock_owned() => permit,
        };
        if *stop_rx.borrow() {
            break;
        }

        shared.set_phase(generation, JobPhase::Running);
        trace!(job = %spec.name, generation, "Running job");
        (spec.action)(JobContext { generation }).await;
        shared.last_run.send_replace(Some(Instant::now()));
        drop(permit);

        if *stop_rx.borrow() {
            break;
        }
        shared.set_phase(generation, JobPhase::Scheduled);

        tokio::select! {
            biased;
            _ = stop_rx.wait_for(|&stopped| stopped) => break,
            () = sleep(spec.interval) => {}
        }
    }
    trace!(job = %spec.name, generation, "Job driver finished");
}
