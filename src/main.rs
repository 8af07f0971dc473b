//! Main entry point for the twstock-ingest CLI

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;
use twstock_ingest::cli::Cli;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("twstock_ingest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Ctrl+C cancels the root token; every running flow winds down from it
    let root_cancel = CancellationToken::new();
    tokio::spawn({
        let root_cancel = root_cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - winding down...");
                root_cancel.cancel();
            }
        }
    });

    if let Err(e) = cli.execute(root_cancel).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
