/// Errors surfaced by a pub/sub backend.
///
/// Cancellation is not an error: `Client::receive` returns `Ok(())` when its
/// token fires, so every variant here is a genuine failure.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// Client could not be constructed (bad endpoint, missing credentials).
    #[error("connect: {0}")]
    Connect(String),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Ресурс с таким именем уже есть, но с другой конфигурацией.
    #[error("{kind} '{name}' already exists: {detail}")]
    AlreadyExists { kind: &'static str, name: String, detail: String },

    /// Backend answered with a non-success status.
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport: {0}")]
    Transport(String),

    /// Backend response could not be decoded.
    #[error("decode: {0}")]
    Decode(String),
}

impl PubSubError {
    pub fn topic_not_found(name: impl Into<String>) -> Self {
        Self::NotFound { kind: "topic", name: name.into() }
    }

    pub fn subscription_not_found(name: impl Into<String>) -> Self {
        Self::NotFound { kind: "subscription", name: name.into() }
    }
}
