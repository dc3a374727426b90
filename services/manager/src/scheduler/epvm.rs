//! Load-aware scheduling based on the enhanced parallel virtual machine
//! cost model.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use corral_task::Task;
use tracing::warn;

use crate::node::Node;

use super::Scheduler;

/// LIEB square ice constant, the base of the cost exponentials.
pub const LIEB: f64 = 1.53960071783900203869;

/// Nominal per-node job capacity used to weight the task-count terms.
const MAX_JOBS: f64 = 4.0;

/// Delay between the two CPU usage samples taken while scoring a node.
const CPU_SAMPLE_DELAY: Duration = Duration::from_secs(1);

/// Deadline on each stats fetch, so one stalled node cannot wedge scoring.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Scores candidates by the marginal cost of adding the task, from live
/// node stats. Memory dominates the decision: the cpu term cancels to zero
/// as the cost expression is written, and is kept only for symmetry with
/// the memory term.
pub struct Epvm {
    client: reqwest::Client,
}

impl Epvm {
    pub fn new() -> Self {
        Epvm {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Marginal cost of placing `task` on `node`, given averaged CPU usage.
    fn cost(task: &Task, node: &Node, avg_cpu_usage: f64) -> f64 {
        let cpu_load = avg_cpu_usage / 2f64.powf(0.8);

        let task_count = node.task_count as f64;
        let mem_allocated = node.stats.mem_used_kb() as f64 + node.memory_allocated as f64;
        let mem_pct = mem_allocated / node.memory as f64;
        let new_mem_pct = (mem_allocated + (task.memory / 1000) as f64) / node.memory as f64;

        let mem_cost = LIEB.powf(new_mem_pct) + LIEB.powf((task_count + 1.0) / MAX_JOBS)
            - LIEB.powf(mem_pct)
            - LIEB.powf(task_count / MAX_JOBS);
        let cpu_cost = LIEB.powf(cpu_load) + LIEB.powf((task_count + 1.0) / MAX_JOBS)
            - LIEB.powf(cpu_load)
            - LIEB.powf(task_count / MAX_JOBS);

        mem_cost + cpu_cost
    }
}

impl Default for Epvm {
    fn default() -> Self {
        Epvm::new()
    }
}

#[async_trait]
impl Scheduler for Epvm {
    /// Keep nodes with enough free disk for the task.
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| task.disk <= node.disk - node.disk_allocated)
            .cloned()
            .collect()
    }

    async fn score(&self, task: &Task, candidates: &[Node]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();

        for candidate in candidates {
            let mut node = candidate.clone();
            if let Err(err) = node.update_stats(&self.client).await {
                warn!(node = %node.name, error = %err, "failed to refresh node stats, skipping");
                continue;
            }
            let first_sample = node.stats.cpu_usage();

            tokio::time::sleep(CPU_SAMPLE_DELAY).await;
            if let Err(err) = node.update_stats(&self.client).await {
                warn!(node = %node.name, error = %err, "failed to resample node stats, skipping");
                continue;
            }
            let avg_cpu_usage = (first_sample + node.stats.cpu_usage()) / 2.0;

            scores.insert(node.name.clone(), Self::cost(task, &node, avg_cpu_usage));
        }

        scores
    }
}
