use clap::Args;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::invoker::FunctionRunner;
use crate::remote::{ChannelCredentials, ExecutionRequest};

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Code file to execute
    #[arg(long)]
    pub code: PathBuf,

    /// Runtime identifier
    #[arg(short, long, default_value = "python")]
    pub runtime: String,

    /// Handler in `module.function` form
    #[arg(long)]
    pub handler: String,

    /// Inline JSON event
    #[arg(short, long, conflicts_with = "event_file")]
    pub event: Option<String>,

    /// File holding the JSON event
    #[arg(long)]
    pub event_file: Option<PathBuf>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        debug!("Reading code from file: {:?}", self.code);
        let code = tokio::fs::read(&self.code).await?;
        let event = super::super::read_event(self.event.as_deref(), self.event_file.as_ref()).await?;

        info!("Running {} ({})", self.handler, self.runtime);
        let request = ExecutionRequest::new(
            code,
            self.runtime.as_str(),
            self.handler.as_str(),
            ChannelCredentials::from(&config.ssh),
        )
        .with_event(event);

        let outcome = FunctionRunner::from_config(config).run(&request).await;
        super::report(outcome, config.response.expose_diagnostics)
    }
}
