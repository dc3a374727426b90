//! Round-robin scheduling: rotate through the node list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use corral_task::Task;

use crate::node::Node;

use super::Scheduler;

/// Rotates through the workers, one task each.
///
/// Scoring marks the next node in rotation with a nominal low cost and
/// everything else high, so `pick`'s argmin lands on the rotation target.
pub struct RoundRobin {
    last_index: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            last_index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        RoundRobin::new()
    }
}

#[async_trait]
impl Scheduler for RoundRobin {
    fn select_candidate_nodes(&self, _task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    async fn score(&self, _task: &Task, candidates: &[Node]) -> HashMap<String, f64> {
        if candidates.is_empty() {
            return HashMap::new();
        }

        // Dispatch is serialized through one loop, so a load/store pair is
        // enough to advance the rotation.
        let next = (self.last_index.load(Ordering::SeqCst) + 1) % candidates.len();
        self.last_index.store(next, Ordering::SeqCst);

        candidates
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let score = if index == next { 0.1 } else { 1.0 };
                (node.name.clone(), score)
            })
            .collect()
    }
}
