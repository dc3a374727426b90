//! Worker registrations and their resource accounting.

use anyhow::{bail, Context, Result};
use corral_stats::Stats;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One worker machine registered with the manager.
///
/// Created at startup from the static worker list. The node-stats loop
/// refreshes the resource fields; dispatch and stop adjust `task_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Base API URL, e.g. `http://127.0.0.1:9000`.
    pub api: String,
    pub role: String,
    /// Last stats snapshot fetched from the worker.
    pub stats: Stats,
    /// Total memory in kilobytes.
    pub memory: i64,
    /// Memory in use in kilobytes.
    pub memory_allocated: i64,
    /// Total root-filesystem bytes.
    pub disk: i64,
    /// Root-filesystem bytes in use.
    pub disk_allocated: i64,
    /// Tasks currently dispatched to this node.
    pub task_count: i64,
}

impl Node {
    pub fn new(name: impl Into<String>, api: impl Into<String>, role: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            api: api.into(),
            role: role.into(),
            stats: Stats::default(),
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            task_count: 0,
        }
    }

    /// Fetch `GET {api}/metrics` and refresh every resource field.
    pub async fn update_stats(&mut self, client: &reqwest::Client) -> Result<()> {
        let url = format!("{}/metrics", self.api);
        let response = client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetching metrics from {url}"))?;

        if !response.status().is_success() {
            bail!(
                "unexpected status {} retrieving stats from {}",
                response.status(),
                self.api
            );
        }

        let stats: Stats = response
            .json()
            .await
            .with_context(|| format!("decoding metrics from {}", self.name))?;

        if stats.mem_total_kb() == 0 {
            bail!("node {} reported an empty stats snapshot", self.name);
        }

        self.memory = stats.mem_total_kb() as i64;
        self.memory_allocated = stats.mem_used_kb() as i64;
        self.disk = stats.disk_total() as i64;
        self.disk_allocated = stats.disk_used() as i64;
        self.stats = stats;
        debug!(node = %self.name, "node stats refreshed");
        Ok(())
    }
}
