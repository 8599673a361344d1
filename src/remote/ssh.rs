//! SSH channel backed by the system OpenSSH client.
//!
//! `connect` starts a master connection on a private control socket and keeps
//! it as a child process; every command and upload afterwards is multiplexed
//! over it. `close` asks the master to exit and kills it if it does not, and
//! dropping the channel kills it as well.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::channel::{ChannelConnector, ChannelCredentials, ChannelError, CommandOutput, RemoteChannel};
use crate::config::SshConfig;
use crate::runtime::shell_quote;

/// Exit status OpenSSH uses for its own (transport) failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Extra time given to the ssh process on top of its own ConnectTimeout.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

/// How often `connect` checks whether the control socket is up.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `close` waits for the master after asking it to exit.
const MASTER_EXIT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    ssh_binary: String,
    connect_timeout: Duration,
    upload_timeout: Duration,
    command_timeout: Duration,
    strict_host_key_checking: bool,
}

impl OpenSshConnector {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            connect_timeout: config.connect_timeout(),
            upload_timeout: config.upload_timeout(),
            command_timeout: config.command_timeout(),
            strict_host_key_checking: config.strict_host_key_checking,
        }
    }

    fn common_args(&self, credentials: &ChannelCredentials, control_path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)).into(),
            "-o".into(),
        ];
        if self.strict_host_key_checking {
            args.push("StrictHostKeyChecking=yes".into());
        } else {
            // Micro-VMs are rebuilt per request, so their host keys change constantly.
            args.push("StrictHostKeyChecking=no".into());
            args.push("-o".into());
            args.push("UserKnownHostsFile=/dev/null".into());
            args.push("-o".into());
            args.push("LogLevel=ERROR".into());
        }
        args.push("-i".into());
        args.push(credentials.private_key_path.clone().into_os_string());
        args.push("-p".into());
        args.push(credentials.port.to_string().into());
        args.push("-S".into());
        args.push(control_path.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl ChannelConnector for OpenSshConnector {
    async fn connect(&self, credentials: &ChannelCredentials) -> Result<Box<dyn RemoteChannel>, ChannelError> {
        let control_dir = tempfile::Builder::new().prefix("fnbox-ssh-").tempdir()?;
        let control_path = control_dir.path().join("ctl");
        // The master runs for the whole session, so its stderr goes to a file
        // rather than a pipe nobody drains.
        let log_path = control_dir.path().join("master.log");
        let log_file = std::fs::File::create(&log_path)?;

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(self.common_args(credentials, &control_path))
            .args(["-M", "-N"])
            .arg(credentials.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true);

        debug!("Opening SSH master connection to {}", credentials.destination());
        let mut master = cmd.spawn()?;

        // The socket appears once the master is connected and authenticated.
        let ready = tokio::time::timeout(self.connect_timeout + CONNECT_GRACE, async {
            loop {
                if let Some(status) = master.try_wait()? {
                    return Ok::<_, std::io::Error>(Some(status));
                }
                if control_path.exists() {
                    return Ok(None);
                }
                tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
            }
        })
        .await;

        match ready {
            Err(_) => {
                if let Err(e) = master.kill().await {
                    warn!("Failed to kill SSH master for {}: {}", credentials.host, e);
                }
                return Err(ChannelError::HandshakeTimeout {
                    host: credentials.host.clone(),
                });
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(Some(status))) => {
                let stderr = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
                return Err(classify_connect_failure(&credentials.host, &stderr, &status.to_string()));
            }
            Ok(Ok(None)) => {}
        }

        info!("SSH connection established to {}", credentials.destination());
        Ok(Box::new(OpenSshChannel {
            connector: self.clone(),
            credentials: credentials.clone(),
            control_path,
            master: Some(master),
            control_dir: Some(control_dir),
        }))
    }
}

/// Turn the stderr of a failed `ssh` connect into a typed error.
pub fn classify_connect_failure(host: &str, stderr: &str, status: &str) -> ChannelError {
    let lowered = stderr.to_ascii_lowercase();
    let host = host.to_string();

    if lowered.contains("connection refused") {
        ChannelError::Refused { host }
    } else if lowered.contains("timed out") {
        ChannelError::HandshakeTimeout { host }
    } else if lowered.contains("permission denied") || lowered.contains("too many authentication failures") {
        ChannelError::Auth {
            host,
            message: stderr.trim().to_string(),
        }
    } else {
        let message = match stderr.trim() {
            "" => format!("ssh exited with {}", status),
            trimmed => trimmed.to_string(),
        };
        ChannelError::Connect { host, message }
    }
}

pub struct OpenSshChannel {
    connector: OpenSshConnector,
    credentials: ChannelCredentials,
    control_path: PathBuf,
    // Killed on drop; declared before the socket dir so it goes first.
    master: Option<Child>,
    control_dir: Option<TempDir>,
}

impl OpenSshChannel {
    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.connector.ssh_binary);
        cmd.args(self.connector.common_args(&self.credentials, &self.control_path))
            .args(["-o", "ControlMaster=no"]);
        cmd
    }

    async fn run(
        &self,
        operation: &str,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput, ChannelError> {
        if self.master.is_none() {
            return Err(ChannelError::Remote {
                operation: operation.to_string(),
                message: "channel is closed".to_string(),
            });
        }

        let mut cmd = self.base_command();
        cmd.arg(self.credentials.destination())
            .arg("--")
            .arg(command)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running remote {}: {}", operation, command);
        let mut child = cmd.spawn()?;
        let stdin_pipe = child.stdin.take();

        let feed = async move {
            if let (Some(mut pipe), Some(data)) = (stdin_pipe, stdin) {
                match pipe.write_all(data).await {
                    // The remote side may exit without reading everything.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                    Ok(()) => {}
                }
                pipe.shutdown().await.ok();
            }
            Ok::<(), std::io::Error>(())
        };

        let (fed, output) = tokio::time::timeout(timeout, async {
            tokio::join!(feed, child.wait_with_output())
        })
        .await
        .map_err(|_| ChannelError::Timeout {
            operation: operation.to_string(),
            after: timeout,
        })?;
        fed?;
        let output = output?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if result.exit_code == Some(SSH_TRANSPORT_FAILURE) && result.stdout.is_empty() {
            let failure = classify_connect_failure(&self.credentials.host, &result.stderr, "255");
            if failure.is_unreachable() {
                return Err(failure);
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl RemoteChannel for OpenSshChannel {
    async fn exec(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, ChannelError> {
        self.run("command", command, stdin, self.connector.command_timeout)
            .await
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ChannelError> {
        let bytes = tokio::fs::read(local_path).await?;
        let command = format!("cat > {}", shell_quote(remote_path));
        let output = self
            .run("upload", &command, Some(&bytes), self.connector.upload_timeout)
            .await?;

        if !output.success() {
            return Err(ChannelError::Remote {
                operation: format!("upload to {}", remote_path),
                message: output.stderr.trim().to_string(),
            });
        }
        debug!("Uploaded {} bytes to {}", bytes.len(), remote_path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        let Some(mut master) = self.master.take() else {
            return Ok(());
        };

        let requested = tokio::time::timeout(
            MASTER_EXIT_WAIT,
            Command::new(&self.connector.ssh_binary)
                .arg("-S")
                .arg(&self.control_path)
                .args(["-O", "exit"])
                .arg(self.credentials.destination())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let result = match requested {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(ChannelError::Remote {
                operation: "close".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(e)) => Err(ChannelError::Io(e)),
            Err(_) => Err(ChannelError::Timeout {
                operation: "close".to_string(),
                after: MASTER_EXIT_WAIT,
            }),
        };

        // The master must be gone whatever `-O exit` did.
        let exited = result.is_ok()
            && matches!(
                tokio::time::timeout(MASTER_EXIT_WAIT, master.wait()).await,
                Ok(Ok(_))
            );
        if !exited {
            if let Err(e) = master.kill().await {
                warn!("Failed to kill SSH master for {}: {}", self.credentials.host, e);
            }
        }
        self.control_dir.take();

        if result.is_ok() {
            info!("Disconnected SSH session to {}", self.credentials.destination());
        }
        result
    }
}
