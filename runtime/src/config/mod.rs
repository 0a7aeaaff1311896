//! Configuration management for the launcher: the TOML file and its defaults.

mod loader;
mod types;

pub use loader::*;
pub use types::*;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "quine_launcher.toml";
