use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError<E> {
    #[error("could not finish graceful shutdown within {0:?}")]
    DrainTimeout(Duration),

    /// Background task returned an error.
    #[error("{0}")]
    Worker(E),

    /// Фоновая задача запаниковала или была прервана.
    #[error("worker task: {0}")]
    Join(#[from] tokio::task::JoinError),
}
