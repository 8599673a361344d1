//! CLI command implementations

pub mod check_config;
pub mod invoke;
pub mod run;

pub use check_config::CheckConfigArgs;
pub use invoke::InvokeArgs;
pub use run::RunArgs;

use serde_json::Value;

use super::Cli;
use crate::error::{ExecutionError, Result};

/// Print the result on success; print the error body and exit non-zero otherwise.
pub(crate) fn report(
    outcome: std::result::Result<Value, ExecutionError>,
    expose_diagnostics: bool,
) -> Result<()> {
    match outcome {
        Ok(value) => {
            Cli::print_json(&value)?;
            Cli::success("Function executed");
            Ok(())
        }
        Err(e) => {
            Cli::print_json(&e.to_response(expose_diagnostics))?;
            Cli::error_exit(&format!("{} (HTTP {})", e, e.http_status()));
        }
    }
}
