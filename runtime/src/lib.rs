//! Library entry for the Quine launcher runtime.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the
//! launcher logic, and the runtime pieces for hosts embedding it directly.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod advertiser;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod health;
pub mod identity;
pub mod launch;
pub mod scheduler;
pub mod status;

use alloc::sync::Arc;
#[cfg(unix)]
use std::io;
use std::{env, process, sync::Once};

use eyre::{Result, WrapErr as _};
#[cfg(unix)]
use tokio::task::JoinHandle;
use tracing::{Instrument as _, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use advertiser::{AdvertisementBackend, MdnsBackend, UnavailableBackend};
use app::{Collaborators, Visibility, shutdown_signal, spawn_runtime};
#[cfg(unix)]
use app::{RuntimeHandle, VisibilityControl};
use catalog::{CatalogError, load_catalog};
use cli::{Cli, Command, LogFormat, RunArgs};
use config::LauncherConfig;
use identity::{RoutedAddressSource, current_ipv4, display_address};
use launch::CommandLauncher;
use status::{Notice, StatusSink as _, WatchStatusSink, spawn_status_logger};

static INIT_TRACING: Once = Once::new();

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("QUINE_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// The launcher's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded, the catalog is withheld,
/// or signal handlers cannot be installed.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.log_format);

    let startup_span = tracing::info_span!(
        "launcher.startup",
        config_path = %invocation.config,
        pid = ?process::id(),
        version = env!("CARGO_PKG_VERSION")
    );
    let config = config::load_or_default(&invocation.config)
        .instrument(startup_span.clone())
        .await?;

    match invocation.command {
        Command::Run(args) => run(&config, &args).instrument(startup_span).await,
        Command::Apps { json } => print_catalog(&config, json),
        Command::Probe { endpoint } => {
            let endpoint = endpoint.unwrap_or_else(|| config.health.endpoint.clone());
            let state = health::check_health(&endpoint, config.probe_timeouts()).await;
            println!("{state}");
            Ok(())
        }
        Command::Address => {
            let address = tokio::task::spawn_blocking(|| {
                display_address(current_ipv4(&RoutedAddressSource::default()))
            })
            .await
            .wrap_err("Address lookup failed")?;
            println!("{address}");
            Ok(())
        }
    }
}

fn print_catalog(config: &LauncherConfig, json: bool) -> Result<()> {
    let apps = load_catalog(&config.directory(), &config.allow_list(), config.required_app())?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&apps).wrap_err("Failed to serialize catalog")?
        );
    } else {
        for app in &apps {
            println!("{}\t{}", app.identifier, app.display_name);
        }
    }
    Ok(())
}

fn advertisement_backend(config: &LauncherConfig) -> Arc<dyn AdvertisementBackend> {
    if !config.advertise.enable {
        return Arc::new(UnavailableBackend {
            reason: "service advertisement disabled".to_string(),
        });
    }
    match MdnsBackend::new(config.advertise.host_name.clone()) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!("Failed to start mDNS responder: {e}");
            Arc::new(UnavailableBackend {
                reason: e.to_string(),
            })
        }
    }
}

async fn run(config: &LauncherConfig, args: &RunArgs) -> Result<()> {
    info!("Starting launcher runtime");

    let (mut sink, status_rx) = WatchStatusSink::new();
    let status_logger = spawn_status_logger(status_rx, sink.subscribe_notices());

    match load_catalog(&config.directory(), &config.allow_list(), config.required_app()) {
        Ok(apps) => info!(count = apps.len(), "Catalog loaded"),
        Err(CatalogError::RequiredAppMissing(identifier)) => {
            sink.notify(&Notice::RequiredAppMissing { identifier });
        }
    }

    let collaborators = Collaborators {
        sink: Box::new(sink),
        addresses: Arc::new(RoutedAddressSource::default()),
        launcher: Arc::new(CommandLauncher::new(config.target_commands())),
        advertisement_backend: advertisement_backend(config),
    };
    let initial = if args.start_hidden {
        Visibility::Hidden
    } else {
        Visibility::Visible
    };
    let handle = spawn_runtime(config.runtime_settings(), collaborators, initial);

    #[cfg(unix)]
    let (handle, visibility_forwarder) =
        with_visibility_forwarder(handle, app::forward_visibility_signals).await?;

    let signal_result = shutdown_signal().await;
    info!("Received shutdown, shutting down");
    handle.shutdown().await;

    #[cfg(unix)]
    visibility_forwarder.abort();
    if let Err(e) = status_logger.await {
        warn!("Status logger ended abnormally: {e}");
    }
    signal_result.wrap_err("Failed to listen for shutdown signals")
}

/// Installs the signal forwarder for `handle`. If that fails, the runtime is
/// shut down before the error is returned, so advertisements are withdrawn.
#[cfg(unix)]
async fn with_visibility_forwarder<F>(
    handle: RuntimeHandle,
    install: F,
) -> Result<(RuntimeHandle, JoinHandle<()>)>
where
    F: FnOnce(VisibilityControl) -> io::Result<JoinHandle<()>>,
{
    match install(handle.visibility_control()) {
        Ok(forwarder) => Ok((handle, forwarder)),
        Err(e) => {
            handle.shutdown().await;
            Err(e).wrap_err("Failed to install visibility signal handlers")
        }
    }
}
