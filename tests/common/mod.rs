//! Shared test doubles: a scripted remote channel and a counting VM controller.

#![allow(dead_code)]

use async_trait::async_trait;
use fnbox::remote::{ChannelConnector, ChannelCredentials, ChannelError, CommandOutput, RemoteChannel};
use fnbox::runtime::Runtime;
use fnbox::vm::{LifecycleError, VmController};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One interaction with the remote side, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect { host: String },
    Exec { command: String, stdin: Option<Vec<u8>> },
    Upload { local_path: PathBuf, remote_path: String, content: Vec<u8> },
    Close,
}

#[derive(Debug, Clone, Copy)]
pub enum ConnectFailure {
    Refused,
    HandshakeTimeout,
    Auth,
}

#[derive(Debug, Clone, Copy)]
pub enum AgentFailure {
    Timeout,
    Disconnected,
}

struct Script {
    calls: Vec<Call>,
    connect_failure: Option<ConnectFailure>,
    agent_failure: Option<AgentFailure>,
    mkdir_output: CommandOutput,
    agent_output: CommandOutput,
    upload_fails: bool,
}

#[derive(Clone)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}

pub fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: Some(exit_code),
    }
}

impl MockConnector {
    /// Connector whose agent prints `stdout` and exits 0.
    pub fn returning(stdout: &str) -> Self {
        Self::with_agent_output(output(stdout, "", 0))
    }

    pub fn with_agent_output(agent_output: CommandOutput) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                calls: Vec::new(),
                connect_failure: None,
                agent_failure: None,
                mkdir_output: output("", "", 0),
                agent_output,
                upload_fails: false,
            })),
        }
    }

    pub fn failing_connect(failure: ConnectFailure) -> Self {
        let connector = Self::returning("{}");
        connector.script.lock().unwrap().connect_failure = Some(failure);
        connector
    }

    pub fn failing_agent(failure: AgentFailure) -> Self {
        let connector = Self::returning("{}");
        connector.script.lock().unwrap().agent_failure = Some(failure);
        connector
    }

    pub fn failing_upload() -> Self {
        let connector = Self::returning("{}");
        connector.script.lock().unwrap().upload_fails = true;
        connector
    }

    pub fn failing_mkdir() -> Self {
        let connector = Self::returning("{}");
        connector.script.lock().unwrap().mkdir_output =
            output("", "mkdir: cannot create directory '/function': Read-only file system", 1);
        connector
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Close)).count()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload { local_path, remote_path, content } => {
                    Some((local_path, remote_path, content))
                }
                _ => None,
            })
            .collect()
    }

    pub fn execs(&self) -> Vec<(String, Option<Vec<u8>>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { command, stdin } => Some((command, stdin)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, credentials: &ChannelCredentials) -> Result<Box<dyn RemoteChannel>, ChannelError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Connect {
            host: credentials.host.clone(),
        });
        let host = credentials.host.clone();
        match script.connect_failure {
            Some(ConnectFailure::Refused) => return Err(ChannelError::Refused { host }),
            Some(ConnectFailure::HandshakeTimeout) => {
                return Err(ChannelError::HandshakeTimeout { host })
            }
            Some(ConnectFailure::Auth) => {
                return Err(ChannelError::Auth {
                    host,
                    message: "Permission denied (publickey)".to_string(),
                })
            }
            None => {}
        }
        Ok(Box::new(MockChannel {
            script: self.script.clone(),
            closed: false,
        }))
    }
}

struct MockChannel {
    script: Arc<Mutex<Script>>,
    closed: bool,
}

#[async_trait]
impl RemoteChannel for MockChannel {
    async fn exec(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, ChannelError> {
        assert!(!self.closed, "exec on a closed channel");
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Exec {
            command: command.to_string(),
            stdin: stdin.map(<[u8]>::to_vec),
        });

        if command.starts_with("mkdir") {
            return Ok(script.mkdir_output.clone());
        }
        match script.agent_failure {
            Some(AgentFailure::Timeout) => Err(ChannelError::Timeout {
                operation: "exec".to_string(),
                after: Duration::from_secs(300),
            }),
            Some(AgentFailure::Disconnected) => Err(ChannelError::Remote {
                operation: "exec".to_string(),
                message: "connection reset".to_string(),
            }),
            None => Ok(script.agent_output.clone()),
        }
    }

    async fn upload(&mut self, local_path: &Path, remote_path: &str) -> Result<(), ChannelError> {
        assert!(!self.closed, "upload on a closed channel");
        let content = std::fs::read(local_path)?;
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::Upload {
            local_path: local_path.to_path_buf(),
            remote_path: remote_path.to_string(),
            content,
        });
        if script.upload_fails {
            return Err(ChannelError::Remote {
                operation: "upload".to_string(),
                message: "No space left on device".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.closed = true;
        self.script.lock().unwrap().calls.push(Call::Close);
        Ok(())
    }
}

/// Counts provisioning and teardown calls.
#[derive(Default)]
pub struct CountingController {
    pub provisions: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub fail_provision: AtomicBool,
}

impl CountingController {
    pub fn failing_provision() -> Self {
        let controller = Self::default();
        controller.fail_provision.store(true, Ordering::SeqCst);
        controller
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VmController for CountingController {
    async fn provision(&self, _slot: usize, _runtime: Runtime) -> Result<(), LifecycleError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(LifecycleError::ScriptFailed {
                script: "setup-VM.sh".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "firecracker: failed to boot".to_string(),
            });
        }
        Ok(())
    }

    async fn teardown(&self, _slot: usize) -> Result<(), LifecycleError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn credentials() -> ChannelCredentials {
    ChannelCredentials::new("172.16.0.2", "root", "/keys/id_rsa")
}

pub const PYTHON_CODE: &str = "def handler(event, context):\n    return {\"result\": 1}\n";

/// True when nothing is left behind in the staging directory.
pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut entries| entries.next().is_none()).unwrap_or(false)
}
