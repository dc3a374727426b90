//! Task and task-event records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::State;

/// One container the cluster should be running.
///
/// Created by a client, owned by the manager store, and mirrored into one
/// worker's store once dispatched. The manager mutates it on transitions and
/// restarts; the worker mutates it on runtime events and inspections. Tasks
/// are never deleted: `Completed` and retry-exhausted `Failed` are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    /// Engine-assigned container id; `None` until the task first starts.
    #[serde(default)]
    pub container_id: Option<String>,
    pub state: State,
    /// Image reference, e.g. `strm/helloworld-http`.
    pub image: String,
    /// CPU request in fractional cores.
    #[serde(default)]
    pub cpu: f64,
    /// Memory request in bytes.
    #[serde(default)]
    pub memory: i64,
    /// Disk request in bytes.
    #[serde(default)]
    pub disk: i64,
    /// Exposed container ports as `"port/proto"` strings.
    #[serde(default)]
    pub exposed_ports: Vec<String>,
    /// Container port (`"port/proto"`) to host port.
    #[serde(default)]
    pub port_bindings: HashMap<String, String>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            name: String::new(),
            container_id: None,
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            exposed_ports: Vec::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
            restart_count: 0,
        }
    }
}

/// An immutable request to move a task to a target state.
///
/// Produced by clients and by the manager's restart logic, and kept in the
/// manager's event store as an append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    /// Build an event carrying `task` toward `state`, stamped now.
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}
