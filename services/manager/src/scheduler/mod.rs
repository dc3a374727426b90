//! Worker selection for new tasks.
//!
//! Both algorithms implement the same three-step interface: filter the node
//! list down to candidates, score the candidates (lower is better), and pick
//! the argmin. Ties resolve to the first-listed candidate.

mod epvm;
mod round_robin;

use std::collections::HashMap;

use async_trait::async_trait;
use corral_task::Task;
use thiserror::Error;

use crate::config::SchedulerType;
use crate::node::Node;

pub use epvm::{Epvm, LIEB};
pub use round_robin::RoundRobin;

/// Errors from worker selection.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no candidate nodes match the task's requirements")]
    NoCandidates,

    #[error("no candidate node could be scored")]
    NoScoredNodes,
}

/// Selects the worker node that should run a task.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Nodes able to host the task at all.
    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node>;

    /// Cost per candidate node name; lower is better. Candidates that cannot
    /// be scored are simply absent from the map.
    async fn score(&self, task: &Task, candidates: &[Node]) -> HashMap<String, f64>;

    /// The scored candidate with the minimum cost, first-listed on ties.
    fn pick(&self, scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
        pick_min(scores, candidates)
    }
}

/// Argmin over candidates that have a score; stable on ties.
fn pick_min(scores: &HashMap<String, f64>, candidates: &[Node]) -> Option<Node> {
    let mut best: Option<(&Node, f64)> = None;
    for node in candidates {
        let Some(&score) = scores.get(&node.name) else {
            continue;
        };
        match best {
            Some((_, best_score)) if score >= best_score => {}
            _ => best = Some((node, score)),
        }
    }
    best.map(|(node, _)| node.clone())
}

/// Build the scheduler variant selected on the command line.
pub fn new_scheduler(kind: SchedulerType) -> Box<dyn Scheduler> {
    match kind {
        SchedulerType::RoundRobin => Box::new(RoundRobin::new()),
        SchedulerType::Epvm => Box::new(Epvm::new()),
    }
}
