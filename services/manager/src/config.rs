//! Command-line configuration for the manager binary.

use clap::{Parser, ValueEnum};

/// Which task store variant a process keeps its records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum StoreType {
    /// Plain in-memory map; state dies with the process.
    Memory,
    /// Single-file SQLite store that survives restarts.
    Persisted,
}

/// Scheduling algorithm used to place new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulerType {
    /// Rotate through the workers.
    #[value(name = "roundrobin")]
    RoundRobin,
    /// Load-aware placement from live node stats.
    #[value(name = "epvm")]
    Epvm,
}

/// Minimum level emitted by the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

/// Start the manager process and API.
#[derive(Debug, Parser)]
#[command(name = "corral-manager", version, about)]
pub struct Config {
    /// Host to serve the API on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to serve the API on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Store type to use for tasks and task events.
    #[arg(long = "storeType", value_enum, default_value_t = StoreType::Memory)]
    pub store_type: StoreType,

    /// Scheduler used to select a worker for new tasks.
    #[arg(long = "schedulerType", value_enum, default_value_t = SchedulerType::RoundRobin)]
    pub scheduler_type: SchedulerType,

    /// Address (HOST:PORT) of a worker API to manage; repeatable.
    #[arg(long = "worker", required = true)]
    pub workers: Vec<String>,

    /// Minimum log level.
    #[arg(long = "logLevel", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse_with_repeated_workers() {
        let config = Config::parse_from([
            "corral-manager",
            "--port",
            "8181",
            "--storeType",
            "persisted",
            "--schedulerType",
            "epvm",
            "--worker",
            "127.0.0.1:9000",
            "--worker",
            "127.0.0.1:9001",
        ]);
        assert_eq!(config.port, 8181);
        assert_eq!(config.store_type, StoreType::Persisted);
        assert_eq!(config.scheduler_type, SchedulerType::Epvm);
        assert_eq!(config.workers.len(), 2);
    }

    #[test]
    fn test_at_least_one_worker_required() {
        assert!(Config::try_parse_from(["corral-manager"]).is_err());
    }
}
