//! Command-line interface definitions for the launcher.

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "quine_launcher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Monitoring and service-advertisement runtime of the Quine kiosk launcher")]
pub struct Cli {
    /// Path to the configuration file; built-in defaults apply when it does not exist.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Output format of the log lines.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the launcher runtime until SIGTERM or ctrl-c.
    ///
    /// SIGUSR1 hides the launcher (monitoring pauses), SIGUSR2 shows it again.
    Run(RunArgs),

    /// Print the launcher's app catalog.
    Apps {
        /// Print JSON instead of one line per app.
        #[arg(long)]
        json: bool,
    },

    /// Probe the health endpoint once and print the result.
    Probe {
        /// Probe this URL instead of the configured endpoint.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Print the current local IPv4 address, or the placeholder when offline.
    Address,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Start in the hidden state; monitors wait for SIGUSR2.
    #[arg(long)]
    pub start_hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
    Pretty,
}
