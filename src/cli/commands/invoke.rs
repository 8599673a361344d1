use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::invoker::FunctionInvoker;
use crate::remote::ChannelCredentials;
use crate::store::LocalFunctionStore;

/// Arguments for the invoke command
#[derive(Args)]
pub struct InvokeArgs {
    /// Owner of the function
    #[arg(short, long)]
    pub owner: String,

    /// Handler of the stored function
    #[arg(long)]
    pub handler: String,

    /// Directory holding `<owner>/functions.toml` manifests
    #[arg(short, long, default_value = "functions")]
    pub functions: PathBuf,

    /// Inline JSON event
    #[arg(short, long, conflicts_with = "event_file")]
    pub event: Option<String>,

    /// File holding the JSON event
    #[arg(long)]
    pub event_file: Option<PathBuf>,
}

impl InvokeArgs {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        let event = super::super::read_event(self.event.as_deref(), self.event_file.as_ref()).await?;

        let store = Arc::new(LocalFunctionStore::new(&self.functions));
        let invoker = FunctionInvoker::from_config(config, store.clone(), store);

        info!("Invoking {} for {}", self.handler, self.owner);
        let outcome = invoker
            .invoke(
                &self.owner,
                &self.handler,
                ChannelCredentials::from(&config.ssh),
                event,
            )
            .await;
        super::report(outcome, config.response.expose_diagnostics)
    }
}
