//! corralctl - query the orchestration manager and submit commands.

use anyhow::Result;
use clap::Parser;

mod client;
mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.run().await {
        error::print_error(&err);
        std::process::exit(1);
    }

    Ok(())
}
