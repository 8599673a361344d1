//! fnbox - run serverless functions inside Firecracker microVMs

use fnbox::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = Cli::run().await {
        Cli::error_exit(&format!("Error: {}", e));
    }
    Ok(())
}
