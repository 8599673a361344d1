use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::VmConfig;
use crate::runtime::Runtime;

/// Environment variable telling the scripts which pool slot they act on.
pub const SLOT_ENV_VAR: &str = "FNBOX_VM_SLOT";

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Failed to run {script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {script}: exited with {status}\nStderr: {stderr}")]
    ScriptFailed {
        script: String,
        status: String,
        stderr: String,
    },

    #[error("{script} did not finish within {timeout:?}")]
    ScriptTimedOut { script: String, timeout: Duration },

    #[error("VM pool is closed")]
    PoolClosed,

    #[error("No free VM session although a permit was granted")]
    PoolExhausted,
}

/// Host-side actions that bring one VM slot up or down.
#[async_trait]
pub trait VmController: Send + Sync {
    /// Start the VM in `slot` for `runtime`.
    async fn provision(&self, slot: usize, runtime: Runtime) -> Result<(), LifecycleError>;

    /// Stop the VM in `slot`.
    async fn teardown(&self, slot: usize) -> Result<(), LifecycleError>;
}

/// Runs the provisioning and teardown shell scripts.
pub struct ScriptVmController {
    scripts_dir: PathBuf,
    setup_script: String,
    shutdown_script: String,
    use_sudo: bool,
    timeout: Duration,
}

impl ScriptVmController {
    pub fn new(config: &VmConfig) -> Self {
        Self {
            scripts_dir: config.scripts_dir.clone(),
            setup_script: config.setup_script.clone(),
            shutdown_script: config.shutdown_script.clone(),
            use_sudo: config.use_sudo,
            timeout: config.script_timeout(),
        }
    }

    /// Scripts run from inside `scripts_dir`, so they are named relative to it.
    fn command(&self, script: &str, args: &[&str]) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("bash");
            cmd
        } else {
            Command::new("bash")
        };
        cmd.arg(script)
            .args(args)
            .current_dir(&self.scripts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_script(&self, script: &str, args: &[&str], slot: usize) -> Result<(), LifecycleError> {
        let mut cmd = self.command(script, args);
        cmd.env(SLOT_ENV_VAR, slot.to_string());

        debug!("Running {} {:?} for slot {}", script, args, slot);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| LifecycleError::ScriptTimedOut {
                script: script.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|source| LifecycleError::Spawn {
                script: script.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("{} stdout:\n{}", script, stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!("{} stderr:\n{}", script, stderr.trim_end());
        }

        if !output.status.success() {
            return Err(LifecycleError::ScriptFailed {
                script: script.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        info!("{} completed for slot {}", script, slot);
        Ok(())
    }
}

#[async_trait]
impl VmController for ScriptVmController {
    async fn provision(&self, slot: usize, runtime: Runtime) -> Result<(), LifecycleError> {
        self.run_script(&self.setup_script, &[runtime.as_str()], slot).await
    }

    async fn teardown(&self, slot: usize) -> Result<(), LifecycleError> {
        self.run_script(&self.shutdown_script, &[], slot).await
    }
}
