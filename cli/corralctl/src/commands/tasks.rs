//! Task commands: start, stop, list, get.

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;
use corral_task::{State, Task, TaskEvent};
use serde::Deserialize;
use tabled::Tabled;
use uuid::Uuid;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Path to a JSON file describing the task to start.
    pub file: String,
}

#[derive(Debug, Args)]
pub struct StopArgs {
    /// Id of the task to stop.
    pub task_id: Uuid,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Id of the task to show.
    pub task_id: Uuid,
}

/// On-disk task description submitted with `start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskInput {
    name: String,
    image: String,
    #[serde(default)]
    cpu: f64,
    #[serde(default)]
    memory: i64,
    #[serde(default)]
    disk: i64,
    #[serde(default)]
    exposed_ports: Vec<String>,
    #[serde(default)]
    port_bindings: HashMap<String, String>,
    #[serde(default)]
    restart_policy: String,
}

impl TaskInput {
    fn into_task(self) -> Task {
        Task {
            name: self.name,
            state: State::Scheduled,
            image: self.image,
            cpu: self.cpu,
            memory: self.memory,
            disk: self.disk,
            exposed_ports: self.exposed_ports,
            port_bindings: self.port_bindings,
            restart_policy: self.restart_policy,
            ..Default::default()
        }
    }
}

/// Task row for table output.
#[derive(Debug, Tabled, serde::Serialize)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Container")]
    container_id: String,
    #[tabled(rename = "Restarts")]
    restart_count: u32,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        TaskRow {
            id: task.id.to_string(),
            name: task.name.clone(),
            state: task.state.to_string(),
            image: task.image.clone(),
            container_id: task.container_id.clone().unwrap_or_else(|| "-".into()),
            restart_count: task.restart_count,
        }
    }
}

pub async fn start(ctx: CommandContext, args: StartArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read task file {}", args.file))?;
    let input: TaskInput = serde_json::from_str(&contents)
        .map_err(|err| CliError::InvalidInput(format!("invalid task file: {err}")))?;

    let task = input.into_task();
    let event = TaskEvent::new(State::Scheduled, task);

    let accepted: Task = ctx.client.post("/tasks", &event).await?;
    print_success(&format!("task creation request submitted, id {}", accepted.id));
    Ok(())
}

pub async fn stop(ctx: CommandContext, args: StopArgs) -> Result<()> {
    ctx.client
        .delete(&format!("/tasks/{}", args.task_id))
        .await?;
    print_success("task deletion request submitted");
    Ok(())
}

pub async fn list(ctx: CommandContext) -> Result<()> {
    let tasks: Vec<Task> = ctx.client.get("/tasks").await?;

    match ctx.format {
        OutputFormat::Table => {
            let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
            print_output(&rows, ctx.format);
        }
        OutputFormat::Json => print_single(&tasks),
    }
    Ok(())
}

pub async fn get(ctx: CommandContext, args: GetArgs) -> Result<()> {
    let tasks: Vec<Task> = ctx.client.get("/tasks").await?;
    let task = tasks
        .into_iter()
        .find(|task| task.id == args.task_id)
        .ok_or_else(|| CliError::NotFound(format!("task {}", args.task_id)))?;

    print_single(&task);
    Ok(())
}
