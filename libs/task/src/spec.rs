//! Container-creation view of a task.

use std::collections::HashMap;

use crate::Task;

/// Everything the runtime adapter needs to create and start a container.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub name: String,
    pub image: String,
    /// CPU request in fractional cores; converted to nano-CPUs by the
    /// runtime adapter.
    pub cpu: f64,
    /// Memory limit in bytes.
    pub memory: i64,
    pub env: Vec<String>,
    /// `"port/proto"` strings to expose on the container.
    pub exposed_ports: Vec<String>,
    /// Container port (`"port/proto"`) to host port, bound on `127.0.0.1`.
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
}

impl TaskSpec {
    pub fn from_task(task: &Task) -> Self {
        TaskSpec {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: task.memory,
            env: Vec::new(),
            exposed_ports: task.exposed_ports.clone(),
            port_bindings: task.port_bindings.clone(),
            restart_policy: task.restart_policy.clone(),
        }
    }
}
