//! Manager core: event dispatch, restarts, and reconciliation loops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use corral_store::{MemoryStore, SqliteStore, Store, StoreError};
use corral_task::{valid_state_transition, State, Task, TaskEvent};
use reqwest::StatusCode;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StoreType;
use crate::node::Node;
use crate::scheduler::{Scheduler, SchedulerError};

/// Depth of the pending-event channel. Producers never block on it:
/// overflow spills onto detached sends.
pub const PENDING_CAPACITY: usize = 10;

/// Interval between health, update, and node-stats passes.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Restarts a task gets before the health loop gives up on it.
pub const MAX_RESTARTS: u32 = 3;

/// Deadline on every worker-bound HTTP call, so a stalled worker cannot
/// wedge the dispatch loop.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

type TaskStore = Mutex<Box<dyn Store<Uuid, Task> + Send>>;
type EventStore = Mutex<Box<dyn Store<Uuid, TaskEvent> + Send>>;

/// Which worker each task landed on, and the reverse index.
///
/// Mutated only from the dispatch and health paths; everything else reads.
#[derive(Debug, Default)]
struct Assignments {
    worker_task_map: HashMap<String, Vec<Uuid>>,
    task_worker_map: HashMap<Uuid, String>,
}

/// The cluster control plane.
pub struct Manager {
    pending: mpsc::Sender<TaskEvent>,
    tasks: TaskStore,
    events: EventStore,
    /// Worker API base URLs, in registration order.
    workers: Vec<String>,
    nodes: Vec<Arc<RwLock<Node>>>,
    assignments: Mutex<Assignments>,
    scheduler: Box<dyn Scheduler>,
    client: reqwest::Client,
}

/// Open the store variant selected on the command line. The persisted
/// variant keeps tasks and events in separate single-file stores.
#[allow(clippy::type_complexity)]
pub fn open_stores(
    store_type: StoreType,
) -> Result<(
    Box<dyn Store<Uuid, Task> + Send>,
    Box<dyn Store<Uuid, TaskEvent> + Send>,
)> {
    match store_type {
        StoreType::Memory => Ok((Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))),
        StoreType::Persisted => {
            let tasks: SqliteStore<Uuid, Task> =
                SqliteStore::open("manager_tasks.db", "tasks").context("opening task store")?;
            let events: SqliteStore<Uuid, TaskEvent> =
                SqliteStore::open("manager_task_events.db", "taskEvents")
                    .context("opening event store")?;
            Ok((Box::new(tasks), Box::new(events)))
        }
    }
}

fn normalize_api(addr: &str) -> String {
    if addr.starts_with("http") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

impl Manager {
    /// Build a manager over a static worker list.
    ///
    /// The returned receiver feeds [`Manager::run_dispatch`]. One node is
    /// registered per worker address, named by the address itself.
    pub fn new(
        workers: Vec<String>,
        scheduler: Box<dyn Scheduler>,
        tasks: Box<dyn Store<Uuid, Task> + Send>,
        events: Box<dyn Store<Uuid, TaskEvent> + Send>,
    ) -> (Arc<Self>, mpsc::Receiver<TaskEvent>) {
        let (tx, rx) = mpsc::channel(PENDING_CAPACITY);

        let mut apis = Vec::with_capacity(workers.len());
        let mut nodes = Vec::with_capacity(workers.len());
        let mut assignments = Assignments::default();
        for worker in &workers {
            let api = normalize_api(worker);
            assignments.worker_task_map.insert(api.clone(), Vec::new());
            nodes.push(Arc::new(RwLock::new(Node::new(
                worker.clone(),
                api.clone(),
                "worker",
            ))));
            apis.push(api);
        }

        let manager = Arc::new(Manager {
            pending: tx,
            tasks: Mutex::new(tasks),
            events: Mutex::new(events),
            workers: apis,
            nodes,
            assignments: Mutex::new(assignments),
            scheduler,
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        });
        (manager, rx)
    }

    /// Enqueue a task event without ever blocking the caller.
    pub fn add_task(&self, event: TaskEvent) {
        match self.pending.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(event_id = %event.id, "pending channel full, detaching enqueue");
                let tx = self.pending.clone();
                tokio::spawn(async move {
                    if tx.send(event).await.is_err() {
                        warn!("pending channel closed before detached enqueue completed");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_id = %event.id, "pending channel closed, dropping event");
            }
        }
    }

    /// Snapshot of every task in the store.
    pub fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.tasks.lock().unwrap().list()
    }

    /// One task by id, [`StoreError::NotFound`] when absent.
    pub fn task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.tasks.lock().unwrap().get(&id)
    }

    /// Current node registrations with their resource accounting.
    pub async fn nodes(&self) -> Vec<Node> {
        let mut snapshot = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            snapshot.push(node.read().await.clone());
        }
        snapshot
    }

    /// The worker a task is assigned to, if it was dispatched.
    pub fn assigned_worker(&self, task_id: Uuid) -> Option<String> {
        self.assignments
            .lock()
            .unwrap()
            .task_worker_map
            .get(&task_id)
            .cloned()
    }

    /// Close both stores, flushing the persisted variants to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.tasks.lock().unwrap().close()?;
        self.events.lock().unwrap().close()
    }

    fn persist_task(&self, task: &Task) {
        if let Err(err) = self.tasks.lock().unwrap().put(task.id, task.clone()) {
            error!(task_id = %task.id, error = %err, "failed to persist task");
        }
    }

    fn persist_event(&self, event: &TaskEvent) {
        if let Err(err) = self.events.lock().unwrap().put(event.id, event.clone()) {
            error!(event_id = %event.id, error = %err, "failed to persist task event");
        }
    }

    async fn adjust_task_count(&self, api: &str, delta: i64) {
        for node in &self.nodes {
            let mut node = node.write().await;
            if node.api == api {
                node.task_count += delta;
                return;
            }
        }
        warn!(node = %api, "task count adjustment for unknown node");
    }

    /// Consume the pending channel until it closes or shutdown flips.
    pub async fn run_dispatch(
        &self,
        mut pending: mpsc::Receiver<TaskEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("starting dispatch loop");
        loop {
            tokio::select! {
                received = pending.recv() => {
                    let Some(event) = received else {
                        info!("pending channel closed, dispatch exiting");
                        break;
                    };
                    self.send_work(event).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("dispatch loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Restart failed tasks on a fixed cadence.
    pub async fn run_health(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = RECONCILE_INTERVAL.as_secs(),
            "starting health loop"
        );
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.check_tasks_health().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("health loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Pull worker task lists on a fixed cadence.
    pub async fn run_update_tasks(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = RECONCILE_INTERVAL.as_secs(),
            "starting task update loop"
        );
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.update_tasks().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("task update loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Refresh node resource accounting on a fixed cadence.
    pub async fn run_node_stats(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = RECONCILE_INTERVAL.as_secs(),
            "starting node stats loop"
        );
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.update_node_stats().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("node stats loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch one event: route follow-ups to the assigned worker, place
    /// new tasks through the scheduler.
    pub async fn send_work(&self, event: TaskEvent) {
        self.persist_event(&event);

        let assigned = self.assigned_worker(event.task.id);
        if let Some(worker_api) = assigned {
            self.send_follow_up(&worker_api, event).await;
            return;
        }

        self.dispatch_new_task(event).await;
    }

    /// A follow-up event for an already-dispatched task. Only stop requests
    /// are meaningful here; everything else is dropped.
    async fn send_follow_up(&self, worker_api: &str, event: TaskEvent) {
        let task_id = event.task.id;
        let stored = match self.task(task_id) {
            Ok(task) => task,
            Err(err) => {
                error!(task_id = %task_id, error = %err, "follow-up for task missing from store");
                return;
            }
        };

        if event.state != State::Completed
            || !valid_state_transition(stored.state, event.state)
        {
            warn!(
                task_id = %task_id,
                current = %stored.state,
                requested = %event.state,
                "dropping follow-up event with unsupported transition"
            );
            return;
        }

        let url = format!("{worker_api}/tasks/{task_id}");
        match self.client.delete(&url).send().await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                self.adjust_task_count(worker_api, -1).await;
                info!(task_id = %task_id, node = %worker_api, "task stop dispatched");
            }
            Ok(response) => {
                error!(
                    task_id = %task_id,
                    url = %url,
                    status = %response.status(),
                    "worker rejected stop request"
                );
            }
            Err(err) => {
                error!(task_id = %task_id, url = %url, error = %err, "failed to reach worker for stop");
            }
        }
    }

    /// Place a new task on a worker and hand it over.
    async fn dispatch_new_task(&self, event: TaskEvent) {
        let task = event.task.clone();
        let node = match self.select_worker(&task).await {
            Ok(node) => node,
            Err(err) => {
                error!(task_id = %task.id, error = %err, "no worker available for task");
                return;
            }
        };

        {
            let mut assignments = self.assignments.lock().unwrap();
            assignments
                .worker_task_map
                .entry(node.api.clone())
                .or_default()
                .push(task.id);
            assignments.task_worker_map.insert(task.id, node.api.clone());
        }
        self.persist_task(&task);

        let url = format!("{}/tasks", node.api);
        match self.client.post(&url).json(&event).send().await {
            Ok(response) if response.status() == StatusCode::CREATED => {
                self.adjust_task_count(&node.api, 1).await;
                info!(task_id = %task.id, node = %node.name, "task dispatched");
            }
            Ok(response) => {
                error!(
                    task_id = %task.id,
                    url = %url,
                    status = %response.status(),
                    "worker rejected task"
                );
            }
            Err(err) => {
                // Transport failure: unwind the assignment so the retry goes
                // back through scheduling, then requeue (at-least-once).
                error!(task_id = %task.id, url = %url, error = %err, "failed to reach worker, requeueing");
                {
                    let mut assignments = self.assignments.lock().unwrap();
                    assignments.task_worker_map.remove(&task.id);
                    if let Some(queue) = assignments.worker_task_map.get_mut(&node.api) {
                        queue.retain(|id| *id != task.id);
                    }
                }
                self.add_task(event);
            }
        }
    }

    /// Run the scheduler's filter / score / pick pipeline for one task.
    pub async fn select_worker(&self, task: &Task) -> Result<Node, SchedulerError> {
        let nodes = self.nodes().await;
        let candidates = self.scheduler.select_candidate_nodes(task, &nodes);
        if candidates.is_empty() {
            return Err(SchedulerError::NoCandidates);
        }
        let scores = self.scheduler.score(task, &candidates).await;
        self.scheduler
            .pick(&scores, &candidates)
            .ok_or(SchedulerError::NoScoredNodes)
    }

    /// One health pass: restart failed tasks that still have retry budget.
    pub async fn check_tasks_health(&self) {
        let tasks = match self.tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "failed to list tasks for health check");
                return;
            }
        };

        for task in tasks {
            if task.restart_count >= MAX_RESTARTS {
                continue;
            }
            if task.state == State::Failed {
                self.restart_task(task).await;
            }
        }
    }

    /// Reschedule a failed task onto the worker it already lives on.
    async fn restart_task(&self, mut task: Task) {
        let Some(worker_api) = self.assigned_worker(task.id) else {
            warn!(task_id = %task.id, "failed task has no worker assignment, skipping restart");
            return;
        };

        task.state = State::Scheduled;
        task.restart_count += 1;
        self.persist_task(&task);

        let event = TaskEvent::new(State::Running, task.clone());
        self.persist_event(&event);

        let url = format!("{worker_api}/tasks");
        match self.client.post(&url).json(&event).send().await {
            Ok(response) if response.status() == StatusCode::CREATED => {
                info!(
                    task_id = %task.id,
                    node = %worker_api,
                    restart_count = task.restart_count,
                    "task restart dispatched"
                );
            }
            Ok(response) => {
                error!(
                    task_id = %task.id,
                    url = %url,
                    status = %response.status(),
                    "worker rejected restart"
                );
            }
            Err(err) => {
                error!(task_id = %task.id, url = %url, error = %err, "failed to reach worker for restart");
            }
        }
    }

    /// One update pass: pull every worker's task list and merge observed
    /// state into the mirrored tasks.
    pub async fn update_tasks(&self) {
        for worker_api in &self.workers {
            let url = format!("{worker_api}/tasks");
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) => {
                    error!(url = %url, error = %err, "failed to query worker tasks");
                    continue;
                }
            };
            if !response.status().is_success() {
                error!(url = %url, status = %response.status(), "unexpected status querying worker tasks");
                continue;
            }
            let tasks: Vec<Task> = match response.json().await {
                Ok(tasks) => tasks,
                Err(err) => {
                    error!(url = %url, error = %err, "failed to decode worker task list");
                    continue;
                }
            };

            for remote in tasks {
                self.merge_task_update(remote);
            }
        }
    }

    /// Merge the observed fields of one worker-side task into the store,
    /// writing only when something actually changed.
    fn merge_task_update(&self, remote: Task) {
        let mut db = self.tasks.lock().unwrap();
        let mut local = match db.get(&remote.id) {
            Ok(task) => task,
            Err(StoreError::NotFound) => {
                warn!(task_id = %remote.id, "worker reported a task unknown to the manager");
                return;
            }
            Err(err) => {
                error!(task_id = %remote.id, error = %err, "failed to read task for merge");
                return;
            }
        };

        let mut changed = false;
        if local.state != remote.state {
            local.state = remote.state;
            changed = true;
        }
        if local.start_time != remote.start_time {
            local.start_time = remote.start_time;
            changed = true;
        }
        if local.finish_time != remote.finish_time {
            local.finish_time = remote.finish_time;
            changed = true;
        }
        if local.container_id != remote.container_id {
            local.container_id = remote.container_id.clone();
            changed = true;
        }

        if changed {
            debug!(task_id = %local.id, state = %local.state, "task updated from worker");
            if let Err(err) = db.put(local.id, local) {
                error!(task_id = %remote.id, error = %err, "failed to persist merged task");
            }
        }
    }

    /// One node-stats pass: refresh every node's resource fields.
    pub async fn update_node_stats(&self) {
        for node in &self.nodes {
            let mut node = node.write().await;
            if let Err(err) = node.update_stats(&self.client).await {
                warn!(node = %node.name, error = %err, "failed to refresh node stats");
            }
        }
    }
}
