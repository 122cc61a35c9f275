//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;
use verity_harness::HarnessError;

/// Exit code when checks ran and at least one failed.
const EXIT_CHECKS_FAILED: i32 = 1;

/// Exit code for everything that stopped a run early.
const EXIT_INFRASTRUCTURE: i32 = 2;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unknown output format: {0}")]
    UnknownFormat(String),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(harness) = err.downcast_ref::<HarnessError>() {
        match harness {
            HarnessError::ConvergenceTimeout { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Raise waits.convergence_timeout_secs or check the units listed above.".yellow()
                );
            }
            HarnessError::Auth(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the [credentials] section and the identity endpoint.".yellow()
                );
            }
            HarnessError::Config(_) => {
                eprintln!("\n{}", "Hint: Run with --config to point at a TOML file.".yellow());
            }
            _ => {}
        }
    }
}

/// Process exit code for `err`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HarnessError>() {
        Some(HarnessError::ChecksFailed(_)) => EXIT_CHECKS_FAILED,
        _ => EXIT_INFRASTRUCTURE,
    }
}
