use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FnBoxError>;

/// Crate-level error for everything outside the execution pipeline
/// (configuration, local IO, serialization).
#[derive(Error, Debug)]
pub enum FnBoxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FnBoxError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Closed set of failure kinds a function invocation can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotFound,
    UpstreamDataError,
    UnsupportedRuntime,
    ConnectionError,
    ExecutionFailure,
    ParseError,
    GenericExecutionError,
}

/// How a failure is reported to whoever called us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    ClientError,
    ServerError,
    ServiceUnavailable,
}

impl ErrorKind {
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::NotFound => Severity::ClientError,
            ErrorKind::ConnectionError => Severity::ServiceUnavailable,
            ErrorKind::UpstreamDataError
            | ErrorKind::UnsupportedRuntime
            | ErrorKind::ExecutionFailure
            | ErrorKind::ParseError
            | ErrorKind::GenericExecutionError => Severity::ServerError,
        }
    }

    /// Status code the HTTP layer answers with for this kind.
    pub fn http_status(self) -> u16 {
        match self.severity() {
            Severity::ClientError => 404,
            Severity::ServiceUnavailable => 503,
            Severity::ServerError => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::UpstreamDataError => "UpstreamDataError",
            ErrorKind::UnsupportedRuntime => "UnsupportedRuntime",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::GenericExecutionError => "GenericExecutionError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw diagnostics kept alongside an [`ExecutionError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    /// What the agent printed before failing.
    AgentOutput {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// Lower-level error the failure was built from.
    Cause { cause: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<ErrorDetails>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(self, cause: impl std::fmt::Display) -> Self {
        self.with_details(ErrorDetails::Cause {
            cause: cause.to_string(),
        })
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn upstream_data(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamDataError, msg)
    }

    pub fn unsupported_runtime(runtime: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedRuntime,
            format!("Unsupported runtime for execution agent: {}", runtime),
        )
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionError, msg)
    }

    pub fn execution_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailure, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, msg)
    }

    pub fn generic(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GenericExecutionError, msg)
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// JSON body for the HTTP layer. Raw diagnostics are only included when
    /// `expose_diagnostics` is set.
    pub fn to_response(&self, expose_diagnostics: bool) -> Value {
        let mut body = json!({
            "error": self.kind.as_str(),
            "details": self.message,
        });
        if expose_diagnostics {
            if let Some(details) = &self.details {
                body["diagnostics"] = json!(details);
            }
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::ConnectionError.http_status(), 503);
        for kind in [
            ErrorKind::UpstreamDataError,
            ErrorKind::UnsupportedRuntime,
            ErrorKind::ExecutionFailure,
            ErrorKind::ParseError,
            ErrorKind::GenericExecutionError,
        ] {
            assert_eq!(kind.http_status(), 500, "{kind} should be a server error");
        }
    }

    #[test]
    fn test_unsupported_runtime_message() {
        let err = ExecutionError::unsupported_runtime("ruby");
        assert_eq!(err.kind, ErrorKind::UnsupportedRuntime);
        assert!(err.message.contains("Unsupported runtime for execution agent: ruby"));
    }

    #[test]
    fn test_response_hides_diagnostics_by_default() {
        let err = ExecutionError::parse("Failed to parse function execution result from agent")
            .with_details(ErrorDetails::AgentOutput {
                stdout: "not json".to_string(),
                stderr: "trace".to_string(),
                exit_code: Some(0),
            });

        let hidden = err.to_response(false);
        assert_eq!(hidden["error"], "ParseError");
        assert!(hidden.get("diagnostics").is_none());

        let shown = err.to_response(true);
        assert_eq!(shown["diagnostics"]["type"], "agent_output");
        assert_eq!(shown["diagnostics"]["stdout"], "not json");
    }
}
