use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub vm: VmConfig,
    pub ssh: SshConfig,
    pub agent: AgentConfig,
    pub response: ResponseConfig,
    pub logging: LoggingConfig,
}

/// What the pipeline does when the provisioning script fails.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionFailurePolicy {
    /// Log and try to execute anyway; the connect step usually reports the real problem.
    #[default]
    Continue,
    /// Stop the request with a GenericExecutionError.
    Abort,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VmConfig {
    pub scripts_dir: PathBuf,
    pub setup_script: String,
    pub shutdown_script: String,
    pub use_sudo: bool,
    pub settle_delay_ms: u64,
    pub script_timeout_secs: u64,
    pub pool_size: usize,
    /// SSH host of each pool slot; every slot uses `ssh.host` when empty.
    pub slot_hosts: Vec<String>,
    pub provision_failure_policy: ProvisionFailurePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub username: String,
    pub private_key_path: PathBuf,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub strict_host_key_checking: bool,
    pub ssh_binary: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub code_mount_point: String,
    /// Where staged artifacts are created; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResponseConfig {
    /// Echo raw agent output and underlying causes in error bodies.
    pub expose_diagnostics: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("firecracker/scripts"),
            setup_script: "setup-VM.sh".to_string(),
            shutdown_script: "shutdown-VM.sh".to_string(),
            use_sudo: true,
            settle_delay_ms: 500,
            script_timeout_secs: 120,
            pool_size: 1,
            slot_hosts: Vec::new(),
            provision_failure_policy: ProvisionFailurePolicy::Continue,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "172.16.0.2".to_string(),
            username: "root".to_string(),
            private_key_path: PathBuf::from("firecracker/keys/id_rsa"),
            port: 22,
            connect_timeout_secs: 10,
            upload_timeout_secs: 60,
            command_timeout_secs: 300,
            strict_host_key_checking: false,
            ssh_binary: "ssh".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            code_mount_point: "/function".to_string(),
            staging_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl VmConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then let the environment override it
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        let content = tokio::fs::read_to_string(path).await?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // VM
        if let Ok(dir) = std::env::var("FNBOX_SCRIPTS_DIR") {
            self.vm.scripts_dir = PathBuf::from(dir);
        }
        if let Ok(sudo) = std::env::var("FNBOX_USE_SUDO") {
            self.vm.use_sudo = parse_bool("FNBOX_USE_SUDO", &sudo)?;
        }
        if let Ok(delay) = std::env::var("FNBOX_SETTLE_DELAY_MS") {
            self.vm.settle_delay_ms = delay.parse()?;
        }
        if let Ok(size) = std::env::var("FNBOX_VM_POOL_SIZE") {
            self.vm.pool_size = size.parse()?;
        }

        // SSH channel
        if let Ok(host) = std::env::var("FIRECRACKER_VM_SSH_HOST") {
            self.ssh.host = host;
        }
        if let Ok(user) = std::env::var("FIRECRACKER_VM_SSH_USER") {
            self.ssh.username = user;
        }
        if let Ok(key) = std::env::var("FIRECRACKER_SSH_PRIVATE_KEY_PATH") {
            self.ssh.private_key_path = PathBuf::from(key);
        }
        if let Ok(port) = std::env::var("FIRECRACKER_VM_SSH_PORT") {
            self.ssh.port = port.parse()?;
        }
        if let Ok(timeout) = std::env::var("FNBOX_COMMAND_TIMEOUT_SECS") {
            self.ssh.command_timeout_secs = timeout.parse()?;
        }

        // Agent
        if let Ok(mount) = std::env::var("FIRECRACKER_VM_CODE_MOUNT_POINT") {
            self.agent.code_mount_point = mount;
        }
        if let Ok(dir) = std::env::var("FNBOX_STAGING_DIR") {
            self.agent.staging_dir = Some(PathBuf::from(dir));
        }

        if let Ok(expose) = std::env::var("FNBOX_EXPOSE_DIAGNOSTICS") {
            self.response.expose_diagnostics = parse_bool("FNBOX_EXPOSE_DIAGNOSTICS", &expose)?;
        }

        if let Ok(level) = std::env::var("FNBOX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FNBOX_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.vm.pool_size == 0 {
            anyhow::bail!("VM pool size must be at least 1");
        }

        if !self.vm.slot_hosts.is_empty() && self.vm.slot_hosts.len() != self.vm.pool_size {
            anyhow::bail!(
                "Expected {} slot hosts for the VM pool, got {}",
                self.vm.pool_size,
                self.vm.slot_hosts.len()
            );
        }

        if self.ssh.host.trim().is_empty() {
            anyhow::bail!("SSH host must be set");
        }

        if self.ssh.username.trim().is_empty() {
            anyhow::bail!("SSH username must be set");
        }

        if self.ssh.connect_timeout_secs == 0
            || self.ssh.upload_timeout_secs == 0
            || self.ssh.command_timeout_secs == 0
        {
            anyhow::bail!("SSH timeouts must be greater than zero");
        }

        if self.vm.script_timeout_secs == 0 {
            anyhow::bail!("VM script timeout must be greater than zero");
        }

        if !self.agent.code_mount_point.starts_with('/') {
            anyhow::bail!(
                "Code mount point must be an absolute path, got {}",
                self.agent.code_mount_point
            );
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            anyhow::bail!("Unknown log format: {}", self.logging.format);
        }

        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got {}", name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vm.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.vm.pool_size, 1);
        assert_eq!(config.agent.code_mount_point, "/function");
        assert!(!config.response.expose_diagnostics);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [vm]
            pool_size = 3
            provision_failure_policy = "abort"

            [ssh]
            host = "10.0.0.5"
            "#,
        )
        .unwrap();

        assert_eq!(config.vm.pool_size, 3);
        assert_eq!(config.vm.provision_failure_policy, ProvisionFailurePolicy::Abort);
        assert_eq!(config.vm.setup_script, "setup-VM.sh");
        assert_eq!(config.ssh.host, "10.0.0.5");
        assert_eq!(config.ssh.port, 22);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.vm.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agent.code_mount_point = "function".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vm.pool_size = 2;
        config.vm.slot_hosts = vec!["172.16.0.2".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.ssh.upload_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.vm.script_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ssh.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
