//! corral manager.
//!
//! Starts the dispatch, health, update, and node-stats loops, then serves
//! the manager API until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corral_manager::api;
use corral_manager::config::Config;
use corral_manager::manager::{open_stores, Manager};
use corral_manager::scheduler::new_scheduler;

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

    info!(
        port = config.port,
        workers = config.workers.len(),
        "starting corral manager"
    );

    let (tasks, events) = open_stores(config.store_type)?;
    let scheduler = new_scheduler(config.scheduler_type);
    let (manager, pending_rx) = Manager::new(config.workers.clone(), scheduler, tasks, events);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatch = {
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { manager.run_dispatch(pending_rx, shutdown).await })
    };
    let health = {
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { manager.run_health(shutdown).await })
    };
    let updates = {
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { manager.run_update_tasks(shutdown).await })
    };
    let node_stats = {
        let manager = manager.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { manager.run_node_stats(shutdown).await })
    };

    let app = api::create_router(manager.clone());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "manager API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Flip shutdown, let the loops drain, then release the stores.
    let _ = shutdown_tx.send(true);
    for (name, handle) in [
        ("dispatch", dispatch),
        ("health", health),
        ("updates", updates),
        ("node-stats", node_stats),
    ] {
        if let Err(err) = handle.await {
            error!(loop_name = name, error = %err, "background loop panicked");
        }
    }
    if let Err(err) = manager.close() {
        error!(error = %err, "failed to close stores");
    }

    Ok(())
}
