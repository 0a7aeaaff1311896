//! Start-up launch sequence for companion processes.
//!
//! The display server has to be up before the camera app starts drawing into
//! it, so every step may carry a settle delay. The delay blocks the calling
//! thread; run the sequence on a blocking worker only.

use core::time::Duration;
use alloc::sync::Arc;
use std::{
    collections::{HashMap, HashSet},
    process::{Child, Command, Stdio},
    sync::{Mutex, PoisonError},
    thread,
};

use thiserror::Error as ThisError;
use tracing::{debug, info, warn};

pub const X11_TARGET: &str = "com.termux.x11";
pub const CAMERA_TARGET: &str = "com.example.quinecamera";
pub const X11_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Starts an external process by identifier.
pub trait ProcessLauncher: Send + Sync {
    /// Returns `true` if a launchable target was found and started.
    fn launch(&self, identifier: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchStep {
    pub target: String,
    pub post_launch_delay: Duration,
}

impl LaunchStep {
    pub fn new(target: impl Into<String>, post_launch_delay: Duration) -> Self {
        Self {
            target: target.into(),
            post_launch_delay,
        }
    }
}

/// The device's boot sequence: X11 server, settle, then the camera app.
#[must_use]
pub fn default_steps() -> Vec<LaunchStep> {
    vec![
        LaunchStep::new(X11_TARGET, X11_SETTLE_DELAY),
        LaunchStep::new(CAMERA_TARGET, Duration::ZERO),
    ]
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("launch target not found: {0}")]
    TargetNotFound(String),
}

/// Launches each step in order, stopping at the first target that cannot be resolved.
///
/// # Errors
///
/// Returns [`LaunchError::TargetNotFound`] naming the first unresolved target;
/// later steps are not attempted.
pub fn run_sequence(launcher: &dyn ProcessLauncher, steps: &[LaunchStep]) -> Result<(), LaunchError> {
    for step in steps {
        if !launcher.launch(&step.target) {
            warn!(identifier = %step.target, "Launch target not found, aborting sequence");
            return Err(LaunchError::TargetNotFound(step.target.clone()));
        }
        info!(identifier = %step.target, delay = ?step.post_launch_delay, "Launched");
        if !step.post_launch_delay.is_zero() {
            thread::sleep(step.post_launch_delay);
        }
    }
    Ok(())
}

/// Launches identifiers by spawning configured commands.
///
/// Every child gets a reaper thread that waits for it, so exited companions
/// do not linger as zombies. Children are not killed when the launcher drops.
#[derive(Debug, Default)]
pub struct CommandLauncher {
    commands: HashMap<String, Vec<String>>,
    running: Arc<Mutex<HashSet<u32>>>,
}

impl CommandLauncher {
    #[must_use]
    pub fn new(commands: HashMap<String, Vec<String>>) -> Self {
        Self {
            commands,
            running: Arc::default(),
        }
    }

    /// Number of spawned children that have not exited yet.
    #[must_use]
    pub fn running_children(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn reap(&self, identifier: &str, mut child: Child) {
        let pid = child.id();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
        let running = self.running.clone();
        let identifier = identifier.to_string();
        let spawned = thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => info!(identifier, pid, %status, "Launched process exited"),
                    Err(e) => warn!(identifier, pid, "Failed to wait for launched process: {e}"),
                }
                running
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&pid);
            });
        if let Err(e) = spawned {
            debug!(pid, "Failed to start reaper thread: {e}");
        }
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, identifier: &str) -> bool {
        let Some((program, args)) = self
            .commands
            .get(identifier)
            .and_then(|command| command.split_first())
        else {
            return false;
        };
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                info!(identifier, pid = child.id(), "Spawned {program}");
                self.reap(identifier, child);
                true
            }
            Err(e) => {
                warn!(identifier, "Failed to spawn {program}: {e}");
                false
            }
        }
    }
}
