use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ExecutionError;

/// Runtimes the in-VM execution agent can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Python,
}

impl Runtime {
    pub const ALL: &'static [Runtime] = &[Runtime::Python];

    /// Get the string representation of the runtime
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python => "python",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Runtime::Python => "py",
        }
    }

    pub fn interpreter(&self) -> &'static str {
        match self {
            Runtime::Python => "python3",
        }
    }

    /// Location of the execution agent inside the VM image.
    pub fn agent_path(&self) -> &'static str {
        match self {
            Runtime::Python => "/usr/local/bin/execution-agent.py",
        }
    }

    /// `<interpreter> <agent-path> <handler>`, with the handler quoted for the remote shell.
    pub fn agent_command(&self, handler: &str) -> String {
        format!(
            "{} {} {}",
            self.interpreter(),
            self.agent_path(),
            shell_quote(handler)
        )
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Runtime::ALL
            .iter()
            .copied()
            .find(|runtime| runtime.as_str() == s)
            .ok_or_else(|| ExecutionError::unsupported_runtime(s))
    }
}

/// Module part of a `module.function` handler reference.
pub fn handler_base(handler: &str) -> &str {
    handler.split('.').next().unwrap_or(handler)
}

/// Rejects handlers whose module part could not name a file in the code mount.
pub fn validate_handler(handler: &str) -> Result<(), ExecutionError> {
    let base = handler_base(handler);
    if base.is_empty() {
        return Err(ExecutionError::generic(format!(
            "Invalid handler '{}': expected 'module.function'",
            handler
        )));
    }
    if base.contains('/') || base.contains('\\') {
        return Err(ExecutionError::generic(format!(
            "Invalid handler '{}': module name must not contain path separators",
            handler
        )));
    }
    Ok(())
}

/// Name of the file inside the VM code mount, e.g. `main.py` for `main.handler`.
pub fn remote_filename(handler: &str, runtime: Runtime) -> String {
    format!("{}.{}", handler_base(handler), runtime.file_extension())
}

/// Name of the locally staged file: `<millis>_<module>.<ext>`.
pub fn artifact_filename(handler: &str, runtime: Runtime, created_at: DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        created_at.timestamp_millis(),
        remote_filename(handler, runtime)
    )
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
