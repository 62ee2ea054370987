use lifecycle::LifecycleError;
use pubsub_api::PubSubError;

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError<PubSubError>),
}
