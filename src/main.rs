//! nucleus CLI entrypoint

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use nucleus::cli::{self, Cli};
use nucleus::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configuration errors end the process before any stage runs
    let config = match cli.resolve() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("nucleus: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&config) {
        eprintln!("nucleus: {:#}", e);
        std::process::exit(1);
    }

    let code = match cli::run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Coordinator failed to start");
            1
        }
    };

    // Exits even if a task ignored cancellation
    std::process::exit(code);
}
