use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use lifecycle::{Signal, Supervisor};
use pubsub_backend::{RestBackend, RestConfig};

use crate::config::{DRAIN_TIMEOUT, LISTEN_ADDR, PublisherArgs};
use crate::error::PublisherError;
use crate::http::{self, AppState};

pub async fn run(args: PublisherArgs) -> Result<(), PublisherError> {
    let shutdown = lifecycle::shutdown_signal()?;

    let backend = RestBackend::new(&args.project_id, RestConfig::from_env());
    let state = AppState::new(Arc::new(backend), &args.topic_id);

    let listener = TcpListener::bind(LISTEN_ADDR)
        .await
        .map_err(|source| PublisherError::Bind { addr: LISTEN_ADDR, source })?;
    tracing::info!(
        addr = %LISTEN_ADDR,
        project = %args.project_id,
        topic = %args.topic_id,
        "server is starting"
    );

    serve(listener, state, DRAIN_TIMEOUT, shutdown).await
}

/// Обслуживать `/publish` на `listener` до срабатывания `shutdown`, затем
/// дождаться in-flight запросов, но не дольше `drain`.
pub async fn serve<S>(
    listener: TcpListener,
    state: AppState,
    drain: Duration,
    shutdown: S,
) -> Result<(), PublisherError>
where
    S: Future<Output = Signal>,
{
    let supervisor = Supervisor::new("publisher", drain);
    let token = supervisor.token();
    let app = http::router(state);

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    });

    supervisor.run(shutdown, server).await?;
    Ok(())
}
