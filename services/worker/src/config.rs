//! Command-line configuration for the worker binary.

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

/// Start the worker process and API.
#[derive(Debug, Parser)]
#[command(name = "corral-worker", version, about)]
pub struct Config {
    /// Name of the worker; also names the persisted store file.
    #[arg(long)]
    pub name: String,

    /// Host to serve the API on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to serve the API on.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Store type to use for tasks.
    #[arg(long = "storeType", value_enum, default_value_t = StoreType::Memory)]
    pub store_type: StoreType,

    /// Minimum log level.
    #[arg(long = "logLevel", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}
