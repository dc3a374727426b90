//! Manager core integration tests: dispatch, stop, restart, and update
//! reconciliation against stub worker servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use corral_manager::api;
use corral_manager::manager::Manager;
use corral_manager::scheduler::RoundRobin;
use corral_stats::{DiskInfo, MemInfo, Stats};
use corral_store::{MemoryStore, Store, StoreError};
use corral_task::{State as TaskState, Task, TaskEvent};
use tokio::sync::watch;
use uuid::Uuid;

/// A worker-shaped HTTP stub that records what the manager sends it.
#[derive(Clone)]
struct StubWorker {
    name: String,
    dispatch_log: Arc<Mutex<Vec<String>>>,
    posts: Arc<Mutex<Vec<TaskEvent>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    served_tasks: Arc<Mutex<Vec<Task>>>,
    stats: Stats,
}

impl StubWorker {
    fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }

    fn serve_tasks(&self, tasks: Vec<Task>) {
        *self.served_tasks.lock().unwrap() = tasks;
    }
}

fn stub_stats(total_kb: u64, available_kb: u64) -> Stats {
    Stats {
        memory: MemInfo {
            mem_total_kb: total_kb,
            mem_available_kb: available_kb,
        },
        disk: DiskInfo {
            total: 100_000_000,
            used: 10_000_000,
            free: 90_000_000,
        },
        ..Default::default()
    }
}

async fn spawn_stub(name: &str, dispatch_log: Arc<Mutex<Vec<String>>>, stats: Stats) -> (String, StubWorker) {
    let stub = StubWorker {
        name: name.to_string(),
        dispatch_log,
        posts: Arc::new(Mutex::new(Vec::new())),
        deletes: Arc::new(Mutex::new(Vec::new())),
        served_tasks: Arc::new(Mutex::new(Vec::new())),
        stats,
    };

    async fn post_task(
        State(stub): State<StubWorker>,
        Json(event): Json<TaskEvent>,
    ) -> impl IntoResponse {
        stub.dispatch_log.lock().unwrap().push(stub.name.clone());
        let task = event.task.clone();
        stub.posts.lock().unwrap().push(event);
        (StatusCode::CREATED, Json(task))
    }

    async fn delete_task(State(stub): State<StubWorker>, Path(id): Path<String>) -> StatusCode {
        stub.deletes.lock().unwrap().push(id);
        StatusCode::NO_CONTENT
    }

    async fn get_tasks(State(stub): State<StubWorker>) -> Json<Vec<Task>> {
        Json(stub.served_tasks.lock().unwrap().clone())
    }

    async fn get_metrics(State(stub): State<StubWorker>) -> Json<Stats> {
        Json(stub.stats)
    }

    let app = Router::new()
        .route("/tasks", post(post_task))
        .route("/tasks", get(get_tasks))
        .route("/tasks/{id}", delete(delete_task))
        .route("/metrics", get(get_metrics))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("{}:{}", addr.ip(), addr.port()), stub)
}

fn memory_stores() -> (
    Box<dyn Store<Uuid, Task> + Send>,
    Box<dyn Store<Uuid, TaskEvent> + Send>,
) {
    (Box::new(MemoryStore::new()), Box::new(MemoryStore::new()))
}

fn scheduled_event() -> TaskEvent {
    let task = Task {
        name: "web".into(),
        state: TaskState::Scheduled,
        image: "strm/helloworld-http".into(),
        memory: 64_000_000,
        disk: 10_000_000,
        ..Default::default()
    };
    TaskEvent::new(TaskState::Scheduled, task)
}

async fn single_stub_manager() -> (Arc<Manager>, StubWorker) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (addr, stub) = spawn_stub("w1", log, stub_stats(1_000_000, 900_000)).await;
    let (tasks, events) = memory_stores();
    let (manager, _rx) = Manager::new(vec![addr], Box::new(RoundRobin::new()), tasks, events);
    (manager, stub)
}

#[tokio::test]
async fn test_dispatch_places_task_on_worker() {
    let (manager, stub) = single_stub_manager().await;
    let event = scheduled_event();
    let task_id = event.task.id;

    manager.send_work(event).await;

    assert_eq!(stub.post_count(), 1);
    assert!(manager.assigned_worker(task_id).is_some());
    assert_eq!(manager.task(task_id).unwrap().state, TaskState::Scheduled);

    let nodes = manager.nodes().await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].task_count, 1);
}

#[tokio::test]
async fn test_duplicate_event_dispatches_exactly_one_container() {
    let (manager, stub) = single_stub_manager().await;
    let event = scheduled_event();

    manager.send_work(event.clone()).await;
    // The second submission finds the task already assigned and, not being a
    // stop request, is dropped.
    manager.send_work(event).await;

    assert_eq!(stub.post_count(), 1);
    assert_eq!(manager.nodes().await[0].task_count, 1);
}

#[tokio::test]
async fn test_stop_event_turns_into_worker_delete() {
    let (manager, stub) = single_stub_manager().await;
    let event = scheduled_event();
    let task_id = event.task.id;

    manager.send_work(event.clone()).await;

    // Mirror the task as running, as the update loop would after dispatch.
    let mut running = event.task.clone();
    running.state = TaskState::Running;
    running.container_id = Some("c1".into());
    stub.serve_tasks(vec![running.clone()]);
    manager.update_tasks().await;
    assert_eq!(manager.task(task_id).unwrap().state, TaskState::Running);

    let mut stopping = manager.task(task_id).unwrap();
    stopping.state = TaskState::Completed;
    manager
        .send_work(TaskEvent::new(TaskState::Completed, stopping))
        .await;

    assert_eq!(stub.delete_count(), 1);
    assert_eq!(stub.deletes.lock().unwrap()[0], task_id.to_string());
    assert_eq!(manager.nodes().await[0].task_count, 0);
}

#[tokio::test]
async fn test_follow_up_with_illegal_transition_is_dropped() {
    let (manager, stub) = single_stub_manager().await;
    let event = scheduled_event();
    let task_id = event.task.id;

    manager.send_work(event.clone()).await;

    // Once the task is observed Completed, any follow-up that is not a stop
    // request gets dropped at the dispatch boundary.
    let mut completed = event.task.clone();
    completed.state = TaskState::Completed;
    stub.serve_tasks(vec![completed]);
    manager.update_tasks().await;

    let mut revive = manager.task(task_id).unwrap();
    revive.state = TaskState::Running;
    manager
        .send_work(TaskEvent::new(TaskState::Running, revive))
        .await;

    // No DELETE was issued for a non-stop follow-up.
    assert_eq!(stub.delete_count(), 0);
}

#[tokio::test]
async fn test_round_robin_spreads_tasks_across_workers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (addr1, stub1) = spawn_stub("n1", log.clone(), stub_stats(1_000_000, 900_000)).await;
    let (addr2, stub2) = spawn_stub("n2", log.clone(), stub_stats(1_000_000, 900_000)).await;
    let (addr3, stub3) = spawn_stub("n3", log.clone(), stub_stats(1_000_000, 900_000)).await;

    let (tasks, events) = memory_stores();
    let (manager, _rx) = Manager::new(
        vec![addr1, addr2, addr3],
        Box::new(RoundRobin::new()),
        tasks,
        events,
    );

    for _ in 0..6 {
        manager.send_work(scheduled_event()).await;
    }

    assert_eq!(stub1.post_count(), 2);
    assert_eq!(stub2.post_count(), 2);
    assert_eq!(stub3.post_count(), 2);
    // Rotation starts after index 0.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["n2", "n3", "n1", "n2", "n3", "n1"]
    );
}

#[tokio::test]
async fn test_failed_task_restarts_until_budget_exhausted() {
    let (manager, stub) = single_stub_manager().await;
    let event = scheduled_event();
    let task_id = event.task.id;

    manager.send_work(event.clone()).await;
    assert_eq!(stub.post_count(), 1);

    // The worker keeps reporting the task as failed; every reconcile window
    // the manager merges the failure and restarts, until the cap.
    for _ in 0..5 {
        let mut failed = manager.task(task_id).unwrap();
        failed.state = TaskState::Failed;
        stub.serve_tasks(vec![failed]);
        manager.update_tasks().await;
        manager.check_tasks_health().await;
    }

    let task = manager.task(task_id).unwrap();
    assert_eq!(task.restart_count, 3);
    // One initial dispatch plus exactly three restart posts.
    assert_eq!(stub.post_count(), 4);

    // Restart events carry the task as Scheduled toward Running.
    let last = stub.posts.lock().unwrap().last().unwrap().clone();
    assert_eq!(last.state, TaskState::Running);
    assert_eq!(last.task.state, TaskState::Scheduled);
}

/// A store wrapper that counts writes, for idempotence checks.
struct CountingStore<S> {
    inner: S,
    puts: Arc<AtomicUsize>,
}

impl<S: Store<Uuid, Task>> Store<Uuid, Task> for CountingStore<S> {
    fn list(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list()
    }
    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }
    fn get(&self, key: &Uuid) -> Result<Task, StoreError> {
        self.inner.get(key)
    }
    fn put(&mut self, key: Uuid, value: Task) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value)
    }
    fn close(&mut self) -> Result<(), StoreError> {
        self.inner.close()
    }
}

#[tokio::test]
async fn test_update_tasks_is_idempotent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (addr, stub) = spawn_stub("w1", log, stub_stats(1_000_000, 900_000)).await;

    let puts = Arc::new(AtomicUsize::new(0));
    let counting = CountingStore {
        inner: MemoryStore::new(),
        puts: puts.clone(),
    };
    let (manager, _rx) = Manager::new(
        vec![addr],
        Box::new(RoundRobin::new()),
        Box::new(counting),
        Box::new(MemoryStore::new()),
    );

    let event = scheduled_event();
    let task_id = event.task.id;
    manager.send_work(event.clone()).await;
    let after_dispatch = puts.load(Ordering::SeqCst);

    let mut running = event.task.clone();
    running.state = TaskState::Running;
    running.container_id = Some("c1".into());
    stub.serve_tasks(vec![running]);

    manager.update_tasks().await;
    let after_first = puts.load(Ordering::SeqCst);
    assert_eq!(after_first, after_dispatch + 1);
    assert_eq!(manager.task(task_id).unwrap().state, TaskState::Running);

    // Nothing changed worker-side: a second pass writes nothing.
    manager.update_tasks().await;
    assert_eq!(puts.load(Ordering::SeqCst), after_first);
}

#[tokio::test]
async fn test_persisted_tasks_survive_a_manager_restart() {
    use corral_store::SqliteStore;

    let dir = tempfile::tempdir().unwrap();
    let tasks_path = dir.path().join("manager_tasks.db");
    let events_path = dir.path().join("manager_task_events.db");

    let log = Arc::new(Mutex::new(Vec::new()));
    let (addr, _stub) = spawn_stub("w1", log, stub_stats(1_000_000, 900_000)).await;

    let event = scheduled_event();
    let task_id = event.task.id;

    {
        let tasks: SqliteStore<Uuid, Task> = SqliteStore::open(&tasks_path, "tasks").unwrap();
        let events: SqliteStore<Uuid, TaskEvent> =
            SqliteStore::open(&events_path, "taskEvents").unwrap();
        let (manager, _rx) = Manager::new(
            vec![addr.clone()],
            Box::new(RoundRobin::new()),
            Box::new(tasks),
            Box::new(events),
        );
        manager.send_work(event).await;
        manager.close().unwrap();
    }

    // A fresh manager over the same files sees the last-persisted state.
    let tasks: SqliteStore<Uuid, Task> = SqliteStore::open(&tasks_path, "tasks").unwrap();
    let events: SqliteStore<Uuid, TaskEvent> =
        SqliteStore::open(&events_path, "taskEvents").unwrap();
    let (manager, _rx) = Manager::new(
        vec![addr],
        Box::new(RoundRobin::new()),
        Box::new(tasks),
        Box::new(events),
    );

    let restored = manager.task(task_id).unwrap();
    assert_eq!(restored.state, TaskState::Scheduled);
    assert_eq!(manager.tasks().unwrap().len(), 1);
}

#[tokio::test]
async fn test_node_stats_pass_fills_resource_fields() {
    let (manager, _stub) = single_stub_manager().await;

    manager.update_node_stats().await;

    let nodes = manager.nodes().await;
    assert_eq!(nodes[0].memory, 1_000_000);
    assert_eq!(nodes[0].memory_allocated, 100_000);
    assert_eq!(nodes[0].disk, 100_000_000);
    assert_eq!(nodes[0].disk_allocated, 10_000_000);
}

#[tokio::test]
async fn test_manager_api_status_codes() {
    let stub_log = Arc::new(Mutex::new(Vec::new()));
    let (addr, stub) = spawn_stub("w1", stub_log, stub_stats(1_000_000, 900_000)).await;
    let (tasks, events) = memory_stores();
    let (manager, pending_rx) = Manager::new(vec![addr], Box::new(RoundRobin::new()), tasks, events);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run_dispatch(pending_rx, shutdown_rx).await });
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let app = api::create_router(manager.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    // Undecodable body -> 400.
    let response = client
        .post(format!("{base_url}/tasks"))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown task -> 404; malformed uuid -> 400.
    let response = client
        .delete(format!("{base_url}/tasks/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let response = client
        .delete(format!("{base_url}/tasks/oops"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Valid submission -> 201 with the task echoed, then dispatched.
    let event = scheduled_event();
    let task_id = event.task.id;
    let response = client
        .post(format!("{base_url}/tasks"))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let accepted: Task = response.json().await.unwrap();
    assert_eq!(accepted.id, task_id);

    for _ in 0..100 {
        if stub.post_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stub.post_count(), 1);

    // Stop of the dispatched task -> 204.
    let response = client
        .delete(format!("{base_url}/tasks/{task_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    // Node listing -> 200 with one registered node.
    let nodes: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
}
