//! Worker REST API: task directives in, task state and metrics out.

pub mod error;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use corral_store::StoreError;
use corral_task::{State as TaskState, Task, TaskEvent};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::worker::Worker;
use error::ApiError;

/// Build the worker router.
pub fn create_router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/tasks", post(start_task))
        .route("/tasks", get(get_tasks))
        .route("/tasks/{taskId}", delete(stop_task))
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

/// Accept a task directive and enqueue it for the runner.
async fn start_task(
    State(worker): State<Arc<Worker>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload
        .map_err(|err| ApiError::bad_request(format!("error decoding request body: {err}")))?;

    let task = event.task;
    worker.add_task(task.clone());
    info!(task_id = %task.id, "task queued for execution");
    Ok((StatusCode::CREATED, Json(task)))
}

/// Mark a task for stopping and enqueue the stop directive.
async fn stop_task(
    State(worker): State<Arc<Worker>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| ApiError::bad_request("taskId parameter isn't a valid uuid"))?;

    let mut task = worker.task(task_id).map_err(|err| match err {
        StoreError::NotFound => {
            debug!(task_id = %task_id, "task not found in store");
            ApiError::not_found(format!("task {task_id} not found"))
        }
        other => ApiError::internal(format!("failed to retrieve task: {other}")),
    })?;

    task.state = TaskState::Completed;
    worker.add_task(task.clone());
    info!(task_id = %task_id, container_id = ?task.container_id, "task submitted for deletion");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_tasks(State(worker): State<Arc<Worker>>) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = worker
        .tasks()
        .map_err(|err| ApiError::internal(format!("failed to list tasks: {err}")))?;
    Ok(Json(tasks))
}

/// Current node resource snapshot.
async fn get_metrics(State(worker): State<Arc<Worker>>) -> impl IntoResponse {
    Json(worker.stats())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "worker",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}
