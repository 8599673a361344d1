use serde_json::Value;
use tracing::{debug, error};

use super::channel::CommandOutput;
use crate::error::{ErrorDetails, ExecutionError};

/// Turn the agent's raw output into the function result.
///
/// A run only counts as failed when the exit status is non-zero *and* the
/// agent printed nothing: the agent reports handler errors as a JSON document
/// and exits non-zero, and that document is still the result.
pub fn classify_output(output: CommandOutput) -> Result<Value, ExecutionError> {
    let stdout_empty = output.stdout.trim().is_empty();

    if !output.success() && stdout_empty {
        let stderr = if output.stderr.is_empty() {
            "No stderr output from agent.".to_string()
        } else {
            output.stderr
        };
        return Err(
            ExecutionError::execution_failure("Function execution failed inside VM.").with_details(
                ErrorDetails::AgentOutput {
                    stdout: output.stdout,
                    stderr,
                    exit_code: output.exit_code,
                },
            ),
        );
    }

    if stdout_empty {
        debug!("Agent produced empty stdout, returning an empty object");
        return Ok(Value::Object(Default::default()));
    }

    serde_json::from_str(&output.stdout).map_err(|e| {
        error!("Failed to parse JSON result from agent stdout: {}", e);
        ExecutionError::parse(format!(
            "Failed to parse function execution result from agent: {}",
            e
        ))
        .with_details(ErrorDetails::AgentOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    })
}
