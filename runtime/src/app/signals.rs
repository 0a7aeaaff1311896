//! Process signals driving the runtime from outside.

use std::io;

use tokio::signal;
#[cfg(unix)]
use tokio::{
    signal::unix::{SignalKind, signal as unix_signal},
    task::JoinHandle,
};
#[cfg(unix)]
use tracing::{Instrument as _, info};

#[cfg(unix)]
use super::{Visibility, VisibilityControl};

/// Resolves on SIGTERM or ctrl-c.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
#[cfg(unix)]
pub async fn shutdown_signal() -> io::Result<()> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok(()),
        res = signal::ctrl_c() => res,
    }
}

/// Resolves on ctrl-c.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> io::Result<()> {
    signal::ctrl_c().await
}

/// Maps SIGUSR1 to [`Visibility::Hidden`] and SIGUSR2 to [`Visibility::Visible`].
///
/// The forwarder ends once the runtime stops accepting commands.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
#[cfg(unix)]
pub fn forward_visibility_signals(control: VisibilityControl) -> io::Result<JoinHandle<()>> {
    let mut hide = unix_signal(SignalKind::user_defined1())?;
    let mut show = unix_signal(SignalKind::user_defined2())?;
    Ok(tokio::spawn(
        async move {
            loop {
                let visibility = tokio::select! {
                    Some(()) = hide.recv() => Visibility::Hidden,
                    Some(()) = show.recv() => Visibility::Visible,
                    else => break,
                };
                info!(?visibility, "Visibility signal received");
                if !control.set(visibility) {
                    break;
                }
            }
        }
        .in_current_span(),
    ))
}
