use std::env;

/// Public Pub/Sub REST endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Emulator host (`host:port`), read the same way the official client libraries do.
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

/// Pre-resolved OAuth2 access token for the public endpoint.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Способ авторизации запросов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Emulator: no credentials.
    None,
    Bearer(String),
    /// Публичный endpoint без токена: connect вернёт ошибку.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// Base URL without trailing slash, e.g. `http://localhost:8085`.
    pub endpoint: String,
    pub auth: Auth,
    /// `maxMessages` per pull request.
    pub max_messages: i32,
}

impl RestConfig {
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var(EMULATOR_HOST_ENV).ok(),
            env::var(ACCESS_TOKEN_ENV).ok(),
        )
    }

    fn from_vars(emulator_host: Option<String>, access_token: Option<String>) -> Self {
        match emulator_host.filter(|h| !h.is_empty()) {
            Some(host) => Self::emulator(&host),
            None => Self {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                auth: access_token
                    .filter(|t| !t.is_empty())
                    .map(Auth::Bearer)
                    .unwrap_or(Auth::Missing),
                max_messages: default_max_messages(),
            },
        }
    }

    pub fn emulator(host: &str) -> Self {
        Self {
            endpoint: format!("http://{}", host.trim_end_matches('/')),
            auth: Auth::None,
            max_messages: default_max_messages(),
        }
    }
}

fn default_max_messages() -> i32 {
    100
}
