//! Command-line interface for running functions in Firecracker VMs.
//!
//! `run` executes inline or file-based code directly, `invoke` resolves a
//! stored function first, and `check-config` validates the configuration.

pub mod commands;

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use tracing::debug;

use crate::config::Config;
use crate::error::{FnBoxError, Result};
use crate::logging;

#[derive(Parser)]
#[command(name = "fnbox")]
#[command(about = "fnbox - Run serverless functions inside Firecracker microVMs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a piece of code inside a VM
    Run(commands::run::RunArgs),

    /// Invoke a stored function by owner and handler
    Invoke(commands::invoke::InvokeArgs),

    /// Validate the configuration and print it
    CheckConfig(commands::check_config::CheckConfigArgs),
}

impl Cli {
    /// Parse arguments and run the selected command.
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();

        let config = load_config(cli.config.as_ref()).await?;
        logging::init(&config.logging, cli.verbose)?;
        debug!("fnbox v{}", env!("CARGO_PKG_VERSION"));

        match cli.command {
            Commands::Run(args) => args.execute(&config).await,
            Commands::Invoke(args) => args.execute(&config).await,
            Commands::CheckConfig(args) => args.execute(&config),
        }
    }

    /// Print success message
    pub fn success(message: &str) {
        eprintln!("{} {}", "✓".green().bold(), message);
    }

    /// Print error message and exit
    pub fn error_exit(message: &str) -> ! {
        eprintln!("{} {}", "✗".red().bold(), message.red());
        process::exit(1);
    }

    /// Print the JSON document on stdout.
    pub fn print_json(value: &Value) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// File configuration when a path is given, environment otherwise.
pub async fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path).await,
        None => Config::from_env(),
    }
    .and_then(|config| config.validate().map(|()| config))
    .map_err(|e| FnBoxError::config(format!("{:#}", e)))?;
    Ok(config)
}

/// Event payload from an inline JSON string or a file, `{}` when neither is given.
pub async fn read_event(inline: Option<&str>, file: Option<&PathBuf>) -> Result<Value> {
    if let Some(raw) = inline {
        return Ok(serde_json::from_str(raw)?);
    }
    if let Some(path) = file {
        let raw = tokio::fs::read_to_string(path).await?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(Value::Object(Default::default()))
}
