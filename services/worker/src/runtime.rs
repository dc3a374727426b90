//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts container lifecycle operations:
//! pulling + creating + starting, stopping + removing, and inspection.
//! A mock implementation is provided for tests so the worker's lifecycle
//! logic can be exercised without a container engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use corral_task::TaskSpec;
use tracing::debug;

/// What an inspection reports about a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    /// Engine status string (`running`, `exited`, ...).
    pub status: String,
    /// Host ports bound per exposed container port (`"port/proto"`).
    pub port_bindings: HashMap<String, Vec<String>>,
}

/// Container engine interface.
///
/// Failures propagate verbatim to the worker, which turns them into task
/// state.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull the image, create the container, and start it. Returns the
    /// engine-assigned container id.
    async fn run(&self, spec: &TaskSpec) -> Result<String>;

    /// Stop and remove a container. Both failures surface.
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Report the container's status and current port bindings.
    async fn inspect(&self, container_id: &str) -> Result<ContainerSummary>;
}

/// Mock runtime for tests.
pub struct MockRuntime {
    counter: AtomicU64,
    fail_starts: bool,
    stopped: Mutex<Vec<String>>,
    summaries: Mutex<HashMap<String, ContainerSummary>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        MockRuntime {
            counter: AtomicU64::new(0),
            fail_starts: false,
            stopped: Mutex::new(Vec::new()),
            summaries: Mutex::new(HashMap::new()),
        }
    }

    /// A runtime whose starts always fail.
    pub fn failing() -> Self {
        MockRuntime {
            fail_starts: true,
            ..MockRuntime::new()
        }
    }

    /// Pin the summary a future `inspect` of `container_id` will return.
    pub fn set_summary(&self, container_id: &str, summary: ContainerSummary) {
        self.summaries
            .lock()
            .unwrap()
            .insert(container_id.to_string(), summary);
    }

    /// Container ids that have been stopped, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    fn next_container_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("mock-{n:016x}")
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        MockRuntime::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn run(&self, spec: &TaskSpec) -> Result<String> {
        if self.fail_starts {
            anyhow::bail!("mock runtime configured to fail");
        }
        let container_id = self.next_container_id();
        debug!(name = %spec.name, image = %spec.image, container_id = %container_id, "[mock] container started");
        Ok(container_id)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        debug!(container_id = %container_id, "[mock] container stopped");
        self.stopped.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSummary> {
        let summaries = self.summaries.lock().unwrap();
        Ok(summaries.get(container_id).cloned().unwrap_or_else(|| {
            ContainerSummary {
                status: "running".to_string(),
                port_bindings: HashMap::new(),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> TaskSpec {
        TaskSpec {
            name: "web".into(),
            image: "strm/helloworld-http".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_assigns_unique_container_ids() {
        let runtime = MockRuntime::new();
        let a = runtime.run(&spec()).await.unwrap();
        let b = runtime.run(&spec()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_failing_mock_errors_on_run() {
        let runtime = MockRuntime::failing();
        assert!(runtime.run(&spec()).await.is_err());
    }

    #[tokio::test]
    async fn test_inspect_returns_pinned_summary() {
        let runtime = MockRuntime::new();
        let id = runtime.run(&spec()).await.unwrap();
        runtime.set_summary(
            &id,
            ContainerSummary {
                status: "exited".into(),
                port_bindings: HashMap::new(),
            },
        );
        assert_eq!(runtime.inspect(&id).await.unwrap().status, "exited");
    }
}
