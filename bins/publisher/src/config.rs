use std::time::Duration;

use clap::{Args, Parser};

/// Address the HTTP listener binds to.
pub const LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Максимальное время drain in-flight запросов после сигнала.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "publisher", about = "HTTP service that publishes a fixed message to a Pub/Sub topic")]
pub struct Cli {
    #[command(flatten)]
    pub args: PublisherArgs,
}

#[derive(Args, Clone, Debug)]
pub struct PublisherArgs {
    /// GCP project, которому принадлежит topic.
    #[arg(long, env = "PROJECT_ID", default_value = "go-app-275713")]
    pub project_id: String,

    /// Topic для публикации.
    #[arg(long, env = "TOPIC_ID", default_value = "medium")]
    pub topic_id: String,
}
