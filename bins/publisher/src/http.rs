use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde::Serialize;

use pubsub_api::{Backend, Message};

/// Payload of every published message.
pub const PAYLOAD: &str = "Hello world!";

const INIT_FAILED: &str = "failed to init pubsub client";
const PUBLISH_FAILED: &str = "failed to publish message";

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn Backend>,
    topic: Arc<str>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, topic: &str) -> Self {
        Self {
            backend,
            topic: topic.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/publish", any(handle_publish))
        .with_state(state)
}

/// Фиксированное сообщение, публикуемое на каждый запрос.
pub fn outgoing_message() -> Message {
    Message::new(PAYLOAD)
        .with_attribute("origin", "rust")
        .with_attribute("username", "gcp")
}

#[derive(Serialize)]
struct Published {
    message: String,
}

#[derive(Serialize)]
struct Failure {
    error: &'static str,
}

fn failure(error: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(Failure { error })).into_response()
}

// --- /publish (any method) ---

async fn handle_publish(State(state): State<AppState>) -> Response {
    // Одно подключение на запрос, закрывается по выходу из handler'а.
    let client = match state.backend.connect().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "{INIT_FAILED}");
            return failure(INIT_FAILED);
        }
    };

    match client.publish(&state.topic, outgoing_message()).await {
        Ok(id) => {
            tracing::info!(topic = %state.topic, msg_id = %id, "published message");
            let body = Published {
                message: format!("published message with custom attributes; msg id: {id}"),
            };
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!(topic = %state.topic, error = %e, "{PUBLISH_FAILED}");
            failure(PUBLISH_FAILED)
        }
    }
}
