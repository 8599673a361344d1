use clap::Args;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::{FnBoxError, Result};

/// Arguments for the check-config command
#[derive(Args)]
pub struct CheckConfigArgs {
    /// Print the effective configuration as TOML
    #[arg(long)]
    pub show: bool,
}

impl CheckConfigArgs {
    /// Configuration was already validated while loading.
    pub fn execute(&self, config: &Config) -> Result<()> {
        if self.show {
            println!("{}", toml::to_string_pretty(config).map_err(|e| FnBoxError::internal(e.to_string()))?);
        }
        Cli::success(&format!(
            "Configuration valid: {} VM slot(s), SSH {}@{}:{}",
            config.vm.pool_size, config.ssh.username, config.ssh.host, config.ssh.port
        ));
        Ok(())
    }
}
