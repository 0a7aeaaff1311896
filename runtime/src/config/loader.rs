//! Configuration loading utilities.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;
use tracing::info;

use crate::config::LauncherConfig;

/// Reads and parses the launcher config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read, parsed or validated.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<LauncherConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: LauncherConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    config
        .validate()
        .wrap_err(format!("Invalid config at: {}", path_ref.display()))?;
    Ok(config)
}

/// Like [`load`], but a missing file yields the built-in defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_or_default<P: AsRef<Path>>(path: P) -> eyre::Result<LauncherConfig> {
    let path_ref = path.as_ref();
    if fs::try_exists(path_ref).await.unwrap_or(false) {
        load(path_ref).await
    } else {
        info!(
            "No config file at {}, using built-in defaults",
            path_ref.display()
        );
        Ok(LauncherConfig::default())
    }
}
