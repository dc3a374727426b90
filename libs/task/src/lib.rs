//! Task model shared by the manager, the workers, and the CLI.
//!
//! A [`Task`] is the unit of desired state: one container the cluster should
//! be running, with its resource requests and identity. A [`TaskEvent`] is a
//! request to move a task to a target [`State`]. The transition table in
//! [`state`] is the single authority every component consults before
//! persisting or forwarding a change.

mod spec;
mod state;
mod task;

pub use spec::TaskSpec;
pub use state::{valid_state_transition, State};
pub use task::{Task, TaskEvent};
