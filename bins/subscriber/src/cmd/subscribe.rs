use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use lifecycle::{Signal, Supervisor};
use pubsub_api::{Backend, MessageHandler, PubSubError};
use pubsub_backend::{RestBackend, RestConfig};

use crate::config::{DRAIN_TIMEOUT, SubscriberArgs};
use crate::error::SubscriberError;
use crate::handler::LogHandler;

pub async fn run(args: SubscriberArgs) -> Result<(), SubscriberError> {
    let shutdown = lifecycle::shutdown_signal()?;
    let backend = RestBackend::new(&args.project_id, RestConfig::from_env());

    tracing::info!(
        project = %args.project_id,
        subscription = %args.subscription_id,
        "subscriber is starting"
    );
    supervise(
        Arc::new(backend),
        args.subscription_id,
        Arc::new(LogHandler),
        DRAIN_TIMEOUT,
        shutdown,
    )
    .await
}

/// Запустить receive-цикл в фоне до срабатывания `shutdown`.
///
/// Любая ошибка receive, кроме отмены по сигналу, фатальна.
pub async fn supervise<S>(
    backend: Arc<dyn Backend>,
    subscription: String,
    handler: Arc<dyn MessageHandler>,
    drain: Duration,
    shutdown: S,
) -> Result<(), SubscriberError>
where
    S: Future<Output = Signal>,
{
    let supervisor = Supervisor::new("subscriber", drain);
    let token = supervisor.token();
    let worker = tokio::spawn(pull(backend, subscription, handler, token));

    supervisor.run(shutdown, worker).await?;
    Ok(())
}

async fn pull(
    backend: Arc<dyn Backend>,
    subscription: String,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
) -> Result<(), PubSubError> {
    let client = backend.connect().await?;
    client.receive(&subscription, handler, token).await
}
