use lifecycle::LifecycleError;

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: &'static str,
        source: std::io::Error,
    },

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("server: {0}")]
    Lifecycle(#[from] LifecycleError<std::io::Error>),
}
