mod cmd;
mod config;
mod error;
mod handler;

use clap::Parser;
use config::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = cmd::subscribe::run(cli.args).await {
        tracing::error!(error = %e, "failed to pull messages");
        std::process::exit(1);
    }
}
