use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use pubsub_api::{
    AckReply, Backend, Client, Delivery, Message, MessageHandler, MessageId, PubSubError,
    ReceivedMessage,
};

use crate::config::{ACCESS_TOKEN_ENV, Auth, EMULATOR_HOST_ENV, RestConfig};
use crate::wire::{
    AcknowledgeRequest, ErrorEnvelope, PublishRequest, PublishResponse, PubsubMessage,
    PullRequest, PullResponse, WireReceivedMessage,
};

// ═══════════════════════════════════════════════════════════════
//  RestBackend
// ═══════════════════════════════════════════════════════════════

/// Pub/Sub v1 REST backend for one project.
pub struct RestBackend {
    project: String,
    config: RestConfig,
}

impl RestBackend {
    pub fn new(project: impl Into<String>, config: RestConfig) -> Self {
        Self {
            project: project.into(),
            config,
        }
    }
}

impl Backend for RestBackend {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Client>, PubSubError>> + Send + '_>> {
        Box::pin(async move {
            let token = match &self.config.auth {
                Auth::None => None,
                Auth::Bearer(t) => Some(t.clone()),
                Auth::Missing => {
                    return Err(PubSubError::Connect(format!(
                        "no credentials: set {ACCESS_TOKEN_ENV} or {EMULATOR_HOST_ENV}"
                    )));
                }
            };
            let http = reqwest::Client::builder()
                .build()
                .map_err(|e| PubSubError::Connect(e.to_string()))?;

            Ok(Arc::new(RestClient {
                http,
                base: format!("{}/v1/projects/{}", self.config.endpoint, self.project),
                token,
                max_messages: self.config.max_messages,
            }) as Arc<dyn Client>)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  RestClient
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
struct RestClient {
    http: reqwest::Client,
    /// `{endpoint}/v1/projects/{project}`
    base: String,
    token: Option<String>,
    max_messages: i32,
}

impl RestClient {
    fn topic_url(&self, topic: &str, verb: &str) -> String {
        format!("{}/topics/{topic}:{verb}", self.base)
    }

    fn subscription_url(&self, subscription: &str, verb: &str) -> String {
        format!("{}/subscriptions/{subscription}:{verb}", self.base)
    }

    /// POST a JSON body and decode the JSON answer. 404 maps to `not_found`.
    async fn call<Req, Resp>(
        &self,
        url: &str,
        body: &Req,
        not_found: impl FnOnce() -> PubSubError,
    ) -> Result<Resp, PubSubError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut req = self.http.post(url).json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PubSubError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| PubSubError::Decode(e.to_string()))
    }

    async fn publish_inner(&self, topic: &str, message: Message) -> Result<MessageId, PubSubError> {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
                ..Default::default()
            }],
        };
        let resp: PublishResponse = self
            .call(&self.topic_url(topic, "publish"), &body, || {
                PubSubError::topic_not_found(topic)
            })
            .await?;

        resp.message_ids
            .into_iter()
            .next()
            .map(MessageId::new)
            .ok_or_else(|| PubSubError::Decode("publish response without message id".into()))
    }

    async fn pull(&self, subscription: &str) -> Result<Vec<WireReceivedMessage>, PubSubError> {
        let body = PullRequest { max_messages: self.max_messages };
        let resp: PullResponse = self
            .call(&self.subscription_url(subscription, "pull"), &body, || {
                PubSubError::subscription_not_found(subscription)
            })
            .await?;
        Ok(resp.received_messages)
    }

    /// Цикл pull → handler. Перед возвратом дожидается всех отправленных
    /// `:acknowledge`, в том числе при ошибке.
    async fn receive_inner(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Result<(), PubSubError> {
        let acks = TaskTracker::new();
        let result = self.dispatch(subscription, handler, &token, &acks).await;

        acks.close();
        if !acks.is_empty() {
            tracing::debug!(subscription = %subscription, pending = acks.len(), "flushing acks");
        }
        acks.wait().await;
        result
    }

    async fn dispatch(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        token: &CancellationToken,
        acks: &TaskTracker,
    ) -> Result<(), PubSubError> {
        let ack_url = self.subscription_url(subscription, "acknowledge");
        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                batch = self.pull(subscription) => batch?,
            };

            for wire in batch {
                // Остаток batch истечёт на сервере и будет доставлен повторно.
                if token.is_cancelled() {
                    return Ok(());
                }
                let reply = RestAck {
                    client: self.clone(),
                    url: ack_url.clone(),
                    subscription: subscription.to_string(),
                    ack_id: wire.ack_id.clone(),
                    tracker: acks.clone(),
                };
                match decode_received(wire) {
                    Ok(msg) => handler.handle(Delivery::new(msg, Box::new(reply))).await,
                    Err(e) => {
                        // Payload, который не декодируется, не станет лучше при redelivery.
                        tracing::warn!(
                            subscription = %subscription,
                            ack_id = %reply.ack_id,
                            error = %e,
                            "dropping undecodable message"
                        );
                        Box::new(reply).ack();
                    }
                }
            }
        }
    }
}

impl Client for RestClient {
    fn publish(&self, topic: &str, message: Message)
        -> Pin<Box<dyn Future<Output = Result<MessageId, PubSubError>> + Send + '_>>
    {
        let topic = topic.to_string();
        Box::pin(async move { self.publish_inner(&topic, message).await })
    }

    fn receive(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PubSubError>> + Send + '_>> {
        let subscription = subscription.to_string();
        Box::pin(async move { self.receive_inner(&subscription, handler, token).await })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Ack
// ═══════════════════════════════════════════════════════════════

/// Отправляет `:acknowledge` в фоне, на tracker'е receive-цикла.
/// Ошибки только логируются: сообщение вернётся после ack deadline.
struct RestAck {
    client: RestClient,
    url: String,
    subscription: String,
    ack_id: String,
    tracker: TaskTracker,
}

impl AckReply for RestAck {
    fn ack(self: Box<Self>) {
        let RestAck { client, url, subscription, ack_id, tracker } = *self;
        tracker.spawn(async move {
            let body = AcknowledgeRequest { ack_ids: vec![ack_id] };
            let result: Result<IgnoredAny, _> = client
                .call(&url, &body, || PubSubError::subscription_not_found(&subscription))
                .await;
            if let Err(e) = result {
                tracing::warn!(subscription = %subscription, error = %e, "ack failed");
            }
        });
    }
}

// ═══════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════

fn decode_received(wire: WireReceivedMessage) -> Result<ReceivedMessage, PubSubError> {
    let message = wire.message;
    let data = STANDARD
        .decode(message.data.as_bytes())
        .map_err(|e| PubSubError::Decode(format!("message data: {e}")))?;
    let publish_time = message
        .publish_time
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(SystemTime::from);

    let received = ReceivedMessage {
        id: MessageId::new(message.message_id.unwrap_or_default()),
        message: Message {
            data,
            attributes: message.attributes,
        },
        publish_time,
    };
    Ok(received)
}

fn status_error(status: StatusCode, body: &str) -> PubSubError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    PubSubError::Status {
        code: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::Router;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    // ─── Mock Pub/Sub REST server ───

    #[derive(Default)]
    struct Mock {
        published: Vec<(String, Value)>,
        auth: Vec<Option<String>>,
        pulls: VecDeque<Value>,
        acks: Vec<String>,
    }

    type Shared = Arc<Mutex<Mock>>;

    async fn handle(
        State(mock): State<Shared>,
        Path(path): Path<String>,
        headers: HeaderMap,
        axum::Json(body): axum::Json<Value>,
    ) -> axum::response::Response {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if path.contains("missing") {
            return (
                axum::http::StatusCode::NOT_FOUND,
                axum::Json(json!({"error": {"code": 404, "message": "Resource not found", "status": "NOT_FOUND"}})),
            )
                .into_response();
        }
        if path.contains("broken") {
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"error": {"code": 500, "message": "boom", "status": "INTERNAL"}})),
            )
                .into_response();
        }

        if path.ends_with(":publish") {
            let mut m = mock.lock().unwrap();
            m.auth.push(auth);
            m.published.push((path, body));
            return axum::Json(json!({"messageIds": ["mock-1"]})).into_response();
        }
        if path.ends_with(":pull") {
            let next = mock.lock().unwrap().pulls.pop_front();
            return match next {
                Some(resp) => axum::Json(resp).into_response(),
                None => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    axum::Json(json!({})).into_response()
                }
            };
        }
        if path.ends_with(":acknowledge") {
            let mut m = mock.lock().unwrap();
            if let Some(ids) = body["ackIds"].as_array() {
                m.acks.extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)));
            }
            return axum::Json(json!({})).into_response();
        }
        axum::http::StatusCode::BAD_REQUEST.into_response()
    }

    async fn spawn_mock() -> (Shared, String) {
        let mock: Shared = Arc::new(Mutex::new(Mock::default()));
        let app = Router::new()
            .route("/v1/{*path}", post(handle))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (mock, format!("http://{addr}"))
    }

    fn config(endpoint: &str, auth: Auth) -> RestConfig {
        RestConfig {
            endpoint: endpoint.to_string(),
            auth,
            max_messages: 10,
        }
    }

    struct Forward(mpsc::UnboundedSender<Delivery>);

    impl MessageHandler for Forward {
        fn handle(&self, delivery: Delivery) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            let _ = self.0.send(delivery);
            Box::pin(async {})
        }
    }

    // ─── Tests ───

    #[tokio::test]
    async fn publish_sends_base64_payload_with_bearer_token() {
        let (mock, endpoint) = spawn_mock().await;
        let backend = RestBackend::new("proj", config(&endpoint, Auth::Bearer("t0k".into())));
        let client = backend.connect().await.unwrap();

        let msg = Message::new("Hello world!")
            .with_attribute("origin", "rust")
            .with_attribute("username", "gcp");
        let id = client.publish("medium", msg).await.unwrap();
        assert_eq!(id.as_str(), "mock-1");

        let m = mock.lock().unwrap();
        let (path, body) = &m.published[0];
        assert_eq!(path, "projects/proj/topics/medium:publish");
        assert_eq!(body["messages"][0]["data"], "SGVsbG8gd29ybGQh");
        assert_eq!(body["messages"][0]["attributes"]["origin"], "rust");
        assert_eq!(body["messages"][0]["attributes"]["username"], "gcp");
        assert_eq!(m.auth[0].as_deref(), Some("Bearer t0k"));
    }

    #[tokio::test]
    async fn emulator_requests_carry_no_authorization() {
        let (mock, endpoint) = spawn_mock().await;
        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();
        client.publish("medium", Message::new("x")).await.unwrap();

        assert_eq!(mock.lock().unwrap().auth[0], None);
    }

    #[tokio::test]
    async fn publish_to_missing_topic_is_not_found() {
        let (_mock, endpoint) = spawn_mock().await;
        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();

        let err = client.publish("missing", Message::new("x")).await.unwrap_err();
        assert!(matches!(err, PubSubError::NotFound { kind: "topic", .. }));
    }

    #[tokio::test]
    async fn server_error_surfaces_status_message() {
        let (_mock, endpoint) = spawn_mock().await;
        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();

        let err = client.publish("broken", Message::new("x")).await.unwrap_err();
        match err {
            PubSubError::Status { code, message } => {
                assert_eq!(code, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_without_credentials_fails() {
        let backend = RestBackend::new("proj", config("https://pubsub.googleapis.com", Auth::Missing));
        let err = backend.connect().await.err().unwrap();
        assert!(matches!(err, PubSubError::Connect(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = RestBackend::new("proj", config(&format!("http://{addr}"), Auth::None));
        let client = backend.connect().await.unwrap();
        let err = client.publish("medium", Message::new("x")).await.unwrap_err();
        assert!(matches!(err, PubSubError::Transport(_)));
    }

    #[tokio::test]
    async fn receive_decodes_messages_and_acks() {
        let (mock, endpoint) = spawn_mock().await;
        mock.lock().unwrap().pulls.push_back(json!({
            "receivedMessages": [{
                "ackId": "ack-9",
                "message": {
                    "data": "SGVsbG8gd29ybGQh",
                    "attributes": {"origin": "rust", "username": "gcp"},
                    "messageId": "9",
                    "publishTime": "2024-01-01T00:00:00Z"
                }
            }]
        }));

        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let recv_client = client.clone();
        let recv_token = token.clone();
        let task = tokio::spawn(async move {
            recv_client
                .receive("medium-sub", Arc::new(Forward(tx)), recv_token)
                .await
        });

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.id().as_str(), "9");
        assert_eq!(delivery.data(), b"Hello world!");
        assert_eq!(delivery.attributes()["username"], "gcp");
        assert!(delivery.message().publish_time.is_some());
        delivery.ack();

        let acked = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !mock.lock().unwrap().acks.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(acked.is_ok(), "ack never reached the server");
        assert_eq!(mock.lock().unwrap().acks, vec!["ack-9".to_string()]);

        token.cancel();
        task.await.unwrap().unwrap();
    }

    /// Acks the delivery, then cancels the receive loop from inside the handler.
    struct AckThenCancel {
        token: CancellationToken,
        calls: Arc<AtomicUsize>,
    }

    impl MessageHandler for AckThenCancel {
        fn handle(&self, delivery: Delivery) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            delivery.ack();
            self.token.cancel();
            Box::pin(async {})
        }
    }

    fn received(ack_id: &str, data: &str) -> Value {
        json!({"ackId": ack_id, "message": {"data": data, "messageId": ack_id}})
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn acks_reach_server_before_receive_returns() {
        let (mock, endpoint) = spawn_mock().await;
        mock.lock()
            .unwrap()
            .pulls
            .push_back(json!({"receivedMessages": [received("ack-last", "eA==")]}));

        // Отдельный runtime, который уничтожается сразу после receive, как при выходе процесса.
        let result = tokio::task::spawn_blocking(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let result = rt.block_on(async {
                let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
                let client = backend.connect().await.unwrap();
                let token = CancellationToken::new();
                let handler = AckThenCancel {
                    token: token.clone(),
                    calls: Arc::new(AtomicUsize::new(0)),
                };
                client.receive("medium-sub", Arc::new(handler), token).await
            });
            drop(rt);
            result
        })
        .await
        .unwrap();

        result.unwrap();
        assert_eq!(mock.lock().unwrap().acks, vec!["ack-last".to_string()]);
    }

    #[tokio::test]
    async fn no_handler_call_after_cancellation_mid_batch() {
        let (mock, endpoint) = spawn_mock().await;
        mock.lock().unwrap().pulls.push_back(json!({
            "receivedMessages": [
                received("a-1", "MQ=="),
                received("a-2", "Mg=="),
                received("a-3", "Mw=="),
            ]
        }));

        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = AckThenCancel {
            token: token.clone(),
            calls: calls.clone(),
        };

        tokio::time::timeout(
            Duration::from_secs(5),
            client.receive("medium-sub", Arc::new(handler), token),
        )
        .await
        .expect("receive did not unwind")
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.lock().unwrap().acks, vec!["a-1".to_string()]);
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped_and_batch_continues() {
        let (mock, endpoint) = spawn_mock().await;
        mock.lock().unwrap().pulls.push_back(json!({
            "receivedMessages": [received("a-bad", "!!"), received("a-good", "b2s=")]
        }));

        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let recv_client = client.clone();
        let recv_token = token.clone();
        let task = tokio::spawn(async move {
            recv_client
                .receive("medium-sub", Arc::new(Forward(tx)), recv_token)
                .await
        });

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.id().as_str(), "a-good");
        assert_eq!(delivery.data(), b"ok");
        delivery.ack();

        token.cancel();
        task.await.unwrap().unwrap();

        let mut acks = mock.lock().unwrap().acks.clone();
        acks.sort();
        assert_eq!(acks, vec!["a-bad".to_string(), "a-good".to_string()]);
    }

    #[tokio::test]
    async fn receive_on_missing_subscription_fails() {
        let (_mock, endpoint) = spawn_mock().await;
        let backend = RestBackend::new("proj", config(&endpoint, Auth::None));
        let client = backend.connect().await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = client
            .receive("missing", Arc::new(Forward(tx)), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::NotFound { kind: "subscription", .. }));
    }

    #[test]
    fn status_error_falls_back_to_raw_body() {
        let err = status_error(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(err.to_string(), "status 502: upstream down");
    }
}
