//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(CliError::Network(_)) = err.downcast_ref::<CliError>() {
        eprintln!(
            "\n{}",
            "Hint: check that the manager is running and --host/--port are correct.".yellow()
        );
    }
}
