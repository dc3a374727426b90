//! Manager REST API: task submissions in, cluster state out.

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

use crate::manager::Manager;
use crate::node::Node;
use error::ApiError;

/// Build the manager router.
pub fn create_router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/tasks", post(start_task))
        .route("/tasks", get(get_tasks))
        .route("/tasks/{taskId}", delete(stop_task))
        .route("/nodes", get(get_nodes))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Accept a task event and queue it for dispatch.
async fn start_task(
    State(manager): State<Arc<Manager>>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload
        .map_err(|err| ApiError::bad_request(format!("error decoding request body: {err}")))?;

    let task = event.task.clone();
    manager.add_task(event);
    info!(task_id = %task.id, "task queued for dispatch");
    Ok((StatusCode::CREATED, Json(task)))
}

/// Queue a stop request for a dispatched task.
async fn stop_task(
    State(manager): State<Arc<Manager>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| ApiError::bad_request("taskId parameter isn't a valid uuid"))?;

    let mut task = manager.task(task_id).map_err(|err| match err {
        StoreError::NotFound => {
            debug!(task_id = %task_id, "task not found in store");
            ApiError::not_found(format!("task {task_id} not found"))
        }
        other => ApiError::internal(format!("failed to retrieve task: {other}")),
    })?;

    task.state = TaskState::Completed;
    let event = TaskEvent::new(TaskState::Completed, task);
    manager.add_task(event);
    info!(task_id = %task_id, "task stop request queued");
    Ok(StatusCode::NO_CONTENT)
}

async fn get_tasks(State(manager): State<Arc<Manager>>) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = manager
        .tasks()
        .map_err(|err| ApiError::internal(format!("failed to list tasks: {err}")))?;
    Ok(Json(tasks))
}

/// Registered nodes with their latest resource accounting.
async fn get_nodes(State(manager): State<Arc<Manager>>) -> Json<Vec<Node>> {
    Json(manager.nodes().await)
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
        service: "manager",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}
