//! Task lifecycle states and the legal transitions between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Accepted but not yet assigned to a worker.
    Pending,
    /// Assigned to a worker, waiting to be started there.
    Scheduled,
    /// Container is running on a worker.
    Running,
    /// Stopped successfully; terminal.
    Completed,
    /// Execution failed; restartable until the retry budget is spent.
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Pending => "pending",
            State::Scheduled => "scheduled",
            State::Running => "running",
            State::Completed => "completed",
            State::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Targets reachable from each state. `Running -> Scheduled` exists to
/// support in-place restart of a task that still has a live container.
fn reachable(current: State) -> &'static [State] {
    match current {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Running, State::Failed],
        State::Running => &[State::Completed, State::Failed, State::Scheduled],
        State::Completed => &[],
        State::Failed => &[State::Scheduled],
    }
}

/// Whether moving a task from `current` to `target` is legal.
///
/// Self-transitions are always legal (idempotent no-op). Every component
/// checks this predicate before persisting or forwarding a state change;
/// anything it rejects is logged and dropped at the entry point.
pub fn valid_state_transition(current: State, target: State) -> bool {
    current == target || reachable(current).contains(&target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_transitions_always_valid() {
        for state in [
            State::Pending,
            State::Scheduled,
            State::Running,
            State::Completed,
            State::Failed,
        ] {
            assert!(valid_state_transition(state, state));
        }
    }

    #[test]
    fn test_forward_path() {
        assert!(valid_state_transition(State::Pending, State::Scheduled));
        assert!(valid_state_transition(State::Scheduled, State::Running));
        assert!(valid_state_transition(State::Running, State::Completed));
        assert!(valid_state_transition(State::Scheduled, State::Failed));
        assert!(valid_state_transition(State::Running, State::Failed));
    }

    #[test]
    fn test_restart_edges() {
        // A failed task may be rescheduled, and a running task may be
        // rescheduled in place.
        assert!(valid_state_transition(State::Failed, State::Scheduled));
        assert!(valid_state_transition(State::Running, State::Scheduled));
    }

    #[test]
    fn test_completed_is_terminal() {
        assert!(!valid_state_transition(State::Completed, State::Pending));
        assert!(!valid_state_transition(State::Completed, State::Scheduled));
        assert!(!valid_state_transition(State::Completed, State::Running));
        assert!(!valid_state_transition(State::Completed, State::Failed));
    }

    #[test]
    fn test_illegal_jumps_rejected() {
        assert!(!valid_state_transition(State::Pending, State::Running));
        assert!(!valid_state_transition(State::Pending, State::Completed));
        assert!(!valid_state_transition(State::Scheduled, State::Completed));
        assert!(!valid_state_transition(State::Failed, State::Running));
        assert!(!valid_state_transition(State::Failed, State::Completed));
    }

    #[test]
    fn test_wire_format_is_snake_case() {
        let json = serde_json::to_string(&State::Scheduled).unwrap();
        assert_eq!(json, "\"scheduled\"");
        let state: State = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(state, State::Failed);
    }
}
