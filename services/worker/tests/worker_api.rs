//! Worker API + runner integration tests, driven over real HTTP against a
//! mock container runtime.

use std::sync::Arc;
use std::time::Duration;

use corral_store::{MemoryStore, Store};
use corral_task::{State, Task, TaskEvent};
use corral_worker::api;
use corral_worker::runtime::MockRuntime;
use corral_worker::worker::Worker;
use tokio::sync::watch;
use uuid::Uuid;

struct TestWorker {
    base_url: String,
    worker: Arc<Worker>,
    _shutdown: watch::Sender<bool>,
}

async fn start_worker(runtime: Arc<MockRuntime>) -> TestWorker {
    let db: Box<dyn Store<Uuid, Task> + Send> = Box::new(MemoryStore::new());
    let (worker, pending_rx) = Worker::new("w-test", db, runtime);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run_runner(pending_rx, shutdown_rx).await });
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::create_router(worker.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestWorker {
        base_url: format!("http://{addr}"),
        worker,
        _shutdown: shutdown_tx,
    }
}

fn scheduled_event() -> TaskEvent {
    let task = Task {
        name: "web".into(),
        state: State::Scheduled,
        image: "strm/helloworld-http".into(),
        memory: 64_000_000,
        disk: 10_000_000,
        ..Default::default()
    };
    TaskEvent::new(State::Scheduled, task)
}

async fn wait_for_state(worker: &Worker, task_id: Uuid, state: State) {
    for _ in 0..100 {
        if let Ok(task) = worker.task(task_id) {
            if task.state == state {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {state}");
}

#[tokio::test]
async fn test_post_task_runs_container() {
    let harness = start_worker(Arc::new(MockRuntime::new())).await;
    let client = reqwest::Client::new();
    let event = scheduled_event();
    let task_id = event.task.id;

    let response = client
        .post(format!("{}/tasks", harness.base_url))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let accepted: Task = response.json().await.unwrap();
    assert_eq!(accepted.id, task_id);

    wait_for_state(&harness.worker, task_id, State::Running).await;
    let running = harness.worker.task(task_id).unwrap();
    assert!(running.container_id.is_some());

    let listed: Vec<Task> = client
        .get(format!("{}/tasks", harness.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, State::Running);
}

#[tokio::test]
async fn test_post_with_undecodable_body_is_bad_request() {
    let harness = start_worker(Arc::new(MockRuntime::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/tasks", harness.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_delete_stops_task() {
    let runtime = Arc::new(MockRuntime::new());
    let harness = start_worker(runtime.clone()).await;
    let client = reqwest::Client::new();
    let event = scheduled_event();
    let task_id = event.task.id;

    client
        .post(format!("{}/tasks", harness.base_url))
        .json(&event)
        .send()
        .await
        .unwrap();
    wait_for_state(&harness.worker, task_id, State::Running).await;

    let response = client
        .delete(format!("{}/tasks/{task_id}", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    wait_for_state(&harness.worker, task_id, State::Completed).await;
    let stopped = harness.worker.task(task_id).unwrap();
    assert!(stopped.finish_time.is_some());
    assert_eq!(runtime.stopped().len(), 1);
}

#[tokio::test]
async fn test_delete_unknown_task_is_not_found() {
    let harness = start_worker(Arc::new(MockRuntime::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(format!("{}/tasks/{}", harness.base_url, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_delete_with_bad_uuid_is_bad_request() {
    let harness = start_worker(Arc::new(MockRuntime::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(format!("{}/tasks/not-a-uuid", harness.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_metrics_returns_a_snapshot() {
    let harness = start_worker(Arc::new(MockRuntime::new())).await;

    let response = reqwest::get(format!("{}/metrics", harness.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let stats: corral_stats::Stats = response.json().await.unwrap();
    // The snapshot is primed at construction; on Linux the totals are real.
    let _ = stats.mem_total_kb();
}

#[tokio::test]
async fn test_failed_start_surfaces_in_task_list() {
    let harness = start_worker(Arc::new(MockRuntime::failing())).await;
    let client = reqwest::Client::new();
    let event = scheduled_event();
    let task_id = event.task.id;

    client
        .post(format!("{}/tasks", harness.base_url))
        .json(&event)
        .send()
        .await
        .unwrap();

    wait_for_state(&harness.worker, task_id, State::Failed).await;
}
