//! Shim binary that calls into the `quine_runtime` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

use quine_runtime::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    quine_runtime::inner_main(Cli::parse()).await
}
