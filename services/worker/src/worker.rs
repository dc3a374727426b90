//! Worker core: pending-task queue, execution, and reconciliation loops.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use corral_stats::Stats;
use corral_store::{MemoryStore, SqliteStore, Store, StoreError};
use corral_task::{valid_state_transition, State, Task, TaskSpec};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StoreType;
use crate::runtime::ContainerRuntime;

/// Depth of the pending-task channel. Producers never block on it: overflow
/// spills onto detached sends.
pub const PENDING_CAPACITY: usize = 10;

/// Interval between updater passes and stats refreshes.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

type TaskStore = Mutex<Box<dyn Store<Uuid, Task> + Send>>;

/// One node's worker: owns the task store, the pending queue, and the
/// container runtime handle.
pub struct Worker {
    name: String,
    pending: mpsc::Sender<Task>,
    db: TaskStore,
    stats: RwLock<Stats>,
    runtime: Arc<dyn ContainerRuntime>,
}

/// Open the task store variant selected on the command line. The persisted
/// variant lives in `{name}.db` under a `tasks` bucket.
pub fn open_task_store(
    store_type: StoreType,
    name: &str,
) -> Result<Box<dyn Store<Uuid, Task> + Send>> {
    match store_type {
        StoreType::Memory => Ok(Box::new(MemoryStore::new())),
        StoreType::Persisted => {
            let path = format!("{name}.db");
            let store: SqliteStore<Uuid, Task> = SqliteStore::open(&path, "tasks")
                .with_context(|| format!("opening task store {path}"))?;
            Ok(Box::new(store))
        }
    }
}

impl Worker {
    /// Build a worker around an already-open store and runtime.
    ///
    /// The returned receiver feeds [`Worker::run_runner`]. The stats
    /// snapshot is primed immediately so `GET /metrics` always has data.
    pub fn new(
        name: impl Into<String>,
        db: Box<dyn Store<Uuid, Task> + Send>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> (Arc<Self>, mpsc::Receiver<Task>) {
        let (tx, rx) = mpsc::channel(PENDING_CAPACITY);
        let worker = Arc::new(Worker {
            name: name.into(),
            pending: tx,
            db: Mutex::new(db),
            stats: RwLock::new(Stats::collect()),
            runtime,
        });
        (worker, rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task directive without ever blocking the caller.
    ///
    /// When the channel is full the send moves onto a detached task, trading
    /// bounded in-flight work for constant handler latency.
    pub fn add_task(&self, task: Task) {
        match self.pending.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                debug!(task_id = %task.id, "pending channel full, detaching enqueue");
                let tx = self.pending.clone();
                tokio::spawn(async move {
                    if tx.send(task).await.is_err() {
                        warn!("pending channel closed before detached enqueue completed");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task_id = %task.id, "pending channel closed, dropping task");
            }
        }
    }

    /// Snapshot of every task in the store.
    pub fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.db.lock().unwrap().list()
    }

    /// One task by id, [`StoreError::NotFound`] when absent.
    pub fn task(&self, id: Uuid) -> Result<Task, StoreError> {
        self.db.lock().unwrap().get(&id)
    }

    /// Latest node resource snapshot.
    pub fn stats(&self) -> Stats {
        *self.stats.read().unwrap()
    }

    /// Close the task store, flushing the persisted variant to disk.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.lock().unwrap().close()
    }

    fn persist(&self, task: &Task) {
        if let Err(err) = self.db.lock().unwrap().put(task.id, task.clone()) {
            error!(task_id = %task.id, error = %err, "failed to persist task");
        }
    }

    /// Consume the pending channel until it closes or shutdown flips.
    pub async fn run_runner(
        &self,
        mut pending: mpsc::Receiver<Task>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(worker = %self.name, "starting task runner");
        loop {
            tokio::select! {
                received = pending.recv() => {
                    let Some(task) = received else {
                        info!("pending channel closed, runner exiting");
                        break;
                    };
                    if let Err(err) = self.run_task(task).await {
                        error!(error = %err, "error processing task");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("runner shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Periodically reconcile stored `Running` tasks with the engine.
    pub async fn run_updater(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = RECONCILE_INTERVAL.as_secs(),
            "starting task updater"
        );
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => self.update_tasks().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("updater shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Periodically refresh the node stats snapshot.
    pub async fn run_stats_collector(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = RECONCILE_INTERVAL.as_secs(),
            "starting stats collector"
        );
        let mut interval = tokio::time::interval(RECONCILE_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    *self.stats.write().unwrap() = Stats::collect();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("stats collector shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute one task directive from the pending queue.
    ///
    /// The stored task (inserted from the directive when absent) provides the
    /// transition source; anything the transition table rejects is dropped
    /// here without touching the store.
    pub async fn run_task(&self, received: Task) -> Result<()> {
        let stored = {
            let mut db = self.db.lock().unwrap();
            match db.get(&received.id) {
                Ok(task) => task,
                Err(StoreError::NotFound) => {
                    db.put(received.id, received.clone())?;
                    received.clone()
                }
                Err(err) => {
                    return Err(err).context("retrieving stored task");
                }
            }
        };

        if !valid_state_transition(stored.state, received.state) {
            bail!(
                "invalid state transition from {} to {}",
                stored.state,
                received.state
            );
        }

        match received.state {
            State::Scheduled => {
                // A directive carrying a container id is an in-place restart:
                // tear the old container down before starting fresh.
                if let Some(container_id) = received.container_id.clone() {
                    self.runtime
                        .stop(&container_id)
                        .await
                        .context("stopping container for restart")?;
                }
                self.start_task(received).await
            }
            State::Completed => self.stop_task(received).await,
            other => bail!("running a task shouldn't be represented with the {other} state"),
        }
    }

    async fn start_task(&self, mut task: Task) -> Result<()> {
        let spec = TaskSpec::from_task(&task);
        match self.runtime.run(&spec).await {
            Ok(container_id) => {
                task.container_id = Some(container_id);
                task.state = State::Running;
                task.start_time = Some(Utc::now());
                self.persist(&task);
                info!(task_id = %task.id, container_id = ?task.container_id, "task started");
                Ok(())
            }
            Err(err) => {
                task.state = State::Failed;
                self.persist(&task);
                Err(err).with_context(|| format!("running task {}", task.id))
            }
        }
    }

    async fn stop_task(&self, mut task: Task) -> Result<()> {
        if let Some(container_id) = task.container_id.clone() {
            self.runtime
                .stop(&container_id)
                .await
                .with_context(|| format!("stopping task {}", task.id))?;
        }
        task.state = State::Completed;
        task.finish_time = Some(Utc::now());
        self.persist(&task);
        info!(task_id = %task.id, "task stopped");
        Ok(())
    }

    /// One updater pass: align stored `Running` tasks with engine reality.
    pub async fn update_tasks(&self) {
        let tasks = match self.tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "failed to list tasks for update");
                return;
            }
        };

        for mut task in tasks {
            if task.state != State::Running {
                continue;
            }

            let Some(container_id) = task.container_id.clone() else {
                warn!(task_id = %task.id, "running task has no container id");
                task.state = State::Failed;
                self.persist(&task);
                continue;
            };

            let mut changed = false;
            match self.runtime.inspect(&container_id).await {
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "task inspection failed");
                    task.state = State::Failed;
                    changed = true;
                }
                Ok(summary) if summary.status == "exited" => {
                    warn!(task_id = %task.id, "container exited for running task");
                    task.state = State::Failed;
                    changed = true;
                }
                Ok(summary) => {
                    for (port, host_ports) in &summary.port_bindings {
                        let Some(host_port) = host_ports.first() else {
                            continue;
                        };
                        if task.port_bindings.get(port) != Some(host_port) {
                            task.port_bindings
                                .insert(port.clone(), host_port.clone());
                            changed = true;
                        }
                    }
                }
            }

            if changed {
                self.persist(&task);
            }
        }
    }
}
