//! Error handling, display, and exit codes for the CLI.
//!
//! Exit codes are part of the contract so CI systems can branch on them:
//! 0 success, 2 validation error, 3 not found, 4 conflict (stale version),
//! 1 anything else.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation(_) => 2,
            CliError::NotFound(_) => 3,
            CliError::Conflict(_) => 4,
            _ => 1,
        }
    }
}

/// Resolve the exit code for a top-level error.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map(CliError::exit_code)
        .unwrap_or(1)
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::Conflict(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: The rollout changed underneath this command. Re-run it.".yellow()
                );
            }
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Is the controller running? Check TIDECTL_API_URL.".yellow()
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(CliError::Validation("bad weight".into()).exit_code(), 2);
        assert_eq!(CliError::NotFound("api".into()).exit_code(), 3);
        assert_eq!(CliError::Conflict("stale".into()).exit_code(), 4);
        assert_eq!(
            CliError::Api {
                status: 500,
                message: "boom".into()
            }
            .exit_code(),
            1
        );
    }
}
