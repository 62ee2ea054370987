use std::time::Duration;

use clap::{Args, Parser};

/// Upper bound for the receive loop to unwind after a signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "subscriber", about = "Worker that logs and acknowledges messages from a Pub/Sub subscription")]
pub struct Cli {
    #[command(flatten)]
    pub args: SubscriberArgs,
}

#[derive(Args, Clone, Debug)]
pub struct SubscriberArgs {
    /// Project that owns the subscription.
    #[arg(long, env = "PROJECT_ID", default_value = "go-app-275713")]
    pub project_id: String,

    /// Subscription, из которой читаем.
    #[arg(long, env = "SUBSCRIPTION_ID", default_value = "medium-sub")]
    pub subscription_id: String,
}
