//! Node commands.

use anyhow::Result;
use serde::Deserialize;
use tabled::Tabled;

use crate::output::{print_info, print_output, print_single, OutputFormat};

use super::CommandContext;

/// Node fields the CLI cares about; the manager sends more.
#[derive(Debug, Clone, Deserialize, serde::Serialize, Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "API")]
    api: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Memory (KB)")]
    memory: i64,
    #[tabled(rename = "Disk (bytes)")]
    disk: i64,
    #[tabled(rename = "Tasks")]
    task_count: i64,
}

pub async fn list(ctx: CommandContext) -> Result<()> {
    let nodes: Vec<NodeRow> = ctx.client.get("/nodes").await?;

    if nodes.is_empty() {
        print_info("no managed node found");
        return Ok(());
    }

    match ctx.format {
        OutputFormat::Table => print_output(&nodes, ctx.format),
        OutputFormat::Json => print_single(&nodes),
    }
    Ok(())
}
