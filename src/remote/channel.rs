use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::SshConfig;
use crate::error::ExecutionError;

/// Where and as whom to open the remote-command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCredentials {
    pub host: String,
    pub username: String,
    pub private_key_path: PathBuf,
    pub port: u16,
}

impl ChannelCredentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            private_key_path: private_key_path.into(),
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same credentials aimed at a different host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

impl From<&SshConfig> for ChannelCredentials {
    fn from(config: &SshConfig) -> Self {
        Self::new(&config.host, &config.username, &config.private_key_path).with_port(config.port)
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the command was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection refused by {host}")]
    Refused { host: String },

    #[error("Timed out while waiting for handshake with {host}")]
    HandshakeTimeout { host: String },

    #[error("Authentication to {host} failed: {message}")]
    Auth { host: String, message: String },

    #[error("Failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    #[error("Channel IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Refused connections and handshake timeouts: the VM is not reachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ChannelError::Refused { .. } | ChannelError::HandshakeTimeout { .. }
        )
    }

    /// Error for a failure while opening the channel.
    pub fn into_connect_error(self) -> ExecutionError {
        let message = if self.is_unreachable() {
            "Failed to connect to execution environment (SSH Connection Refused/Timeout)".to_string()
        } else {
            format!("Failed to connect to execution environment: {}", self)
        };
        ExecutionError::connection(message).with_cause(self)
    }

    /// Error for a failure on an already open channel.
    pub fn into_execution_error(self) -> ExecutionError {
        if self.is_unreachable() {
            return self.into_connect_error();
        }
        ExecutionError::generic(format!("An unexpected SSH error occurred: {}", self)).with_cause(self)
    }
}

/// An open, authenticated session to the VM.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Run `command` through the remote shell, feeding `stdin` if given.
    async fn exec(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, ChannelError>;

    /// Copy a local file to `remote_path`.
    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ChannelError>;

    /// Close the session. Further calls on the channel fail.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens [`RemoteChannel`]s.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, credentials: &ChannelCredentials) -> Result<Box<dyn RemoteChannel>, ChannelError>;
}
