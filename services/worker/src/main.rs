//! corral worker.
//!
//! Starts the task runner, updater, and stats loops, then serves the worker
//! API until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corral_worker::api;
use corral_worker::config::Config;
use corral_worker::docker::DockerRuntime;
use corral_worker::worker::{open_task_store, Worker};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(name = %config.name, port = config.port, "starting corral worker");

    let runtime = DockerRuntime::connect()?;
    let db = open_task_store(config.store_type, &config.name)?;
    let (worker, pending_rx) = Worker::new(&config.name, db, Arc::new(runtime));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run_runner(pending_rx, shutdown).await })
    };
    let updater = {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run_updater(shutdown).await })
    };
    let stats = {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run_stats_collector(shutdown).await })
    };

    let app = api::create_router(worker.clone());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "worker API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Flip shutdown, let the loops drain, then release the store.
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("runner", runner), ("updater", updater), ("stats", stats)] {
        if let Err(err) = handle.await {
            error!(loop_name = name, error = %err, "background loop panicked");
        }
    }
    if let Err(err) = worker.close() {
        error!(error = %err, "failed to close task store");
    }

    Ok(())
}
