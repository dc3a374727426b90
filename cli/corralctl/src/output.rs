//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

/// Print a collection in the selected format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string());
            println!("{json}");
        }
    }
}

/// Print a single item as pretty JSON.
pub fn print_single<T: Serialize>(data: &T) {
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    println!("{json}");
}

/// Print a success confirmation.
pub fn print_success(message: &str) {
    println!("{} {}", "OK:".green().bold(), message);
}

/// Print an informational note.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}
