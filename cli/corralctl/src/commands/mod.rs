//! CLI commands.

mod nodes;
mod tasks;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// Query the orchestration manager and submit commands.
#[derive(Debug, Parser)]
#[command(name = "corralctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Manager API host.
    #[arg(long)]
    host: String,

    /// Manager API port.
    #[arg(long)]
    port: u16,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit a start-task request from a JSON task file.
    Start(tasks::StartArgs),

    /// Submit a stop-task request.
    Stop(tasks::StopArgs),

    /// List all tasks known to the manager.
    List,

    /// Show one task.
    Get(tasks::GetArgs),

    /// List the manager's registered worker nodes.
    ListNodes,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            client: ApiClient::new(&self.host, self.port),
            format: self.format,
        };

        match self.command {
            Commands::Start(args) => tasks::start(ctx, args).await,
            Commands::Stop(args) => tasks::stop(ctx, args).await,
            Commands::List => tasks::list(ctx).await,
            Commands::Get(args) => tasks::get(ctx, args).await,
            Commands::ListNodes => nodes::list(ctx).await,
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub client: ApiClient,
    pub format: OutputFormat,
}
