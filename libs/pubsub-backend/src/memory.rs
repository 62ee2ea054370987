use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use pubsub_api::{
    AckReply, Backend, Client, Delivery, Message, MessageHandler, MessageId, PubSubError,
    ReceivedMessage,
};

// ═══════════════════════════════════════════════════════════════
//  SubscriptionQueue
// ═══════════════════════════════════════════════════════════════

/// Очередь ожидающих сообщений одной subscription.
///
/// Доставка без ack при drop reply возвращается в начало очереди.
struct SubscriptionQueue {
    name: String,
    topic: String,
    pending: Mutex<VecDeque<ReceivedMessage>>,
    notify: Notify,
    acked: AtomicU64,
}

impl SubscriptionQueue {
    fn new(name: String, topic: String) -> Self {
        Self {
            name,
            topic,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            acked: AtomicU64::new(0),
        }
    }

    fn push_back(&self, msg: ReceivedMessage) {
        self.lock().push_back(msg);
        self.notify.notify_one();
    }

    fn push_front(&self, msg: ReceivedMessage) {
        self.lock().push_front(msg);
        self.notify.notify_one();
    }

    /// Дождаться следующего сообщения.
    async fn next(&self) -> ReceivedMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.lock().pop_front() {
                return msg;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ReceivedMessage>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryAck
// ═══════════════════════════════════════════════════════════════

struct MemoryAck {
    queue: Arc<SubscriptionQueue>,
    message: Option<ReceivedMessage>,
}

impl AckReply for MemoryAck {
    fn ack(mut self: Box<Self>) {
        if self.message.take().is_some() {
            self.queue.acked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if let Some(msg) = self.message.take() {
            tracing::debug!(subscription = %self.queue.name, msg_id = %msg.id, "delivery dropped without ack, redelivering");
            self.queue.push_front(msg);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Registry
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Registry {
    /// topic → subscriptions attached to it.
    topics: RwLock<HashMap<String, Vec<Arc<SubscriptionQueue>>>>,
    subscriptions: RwLock<HashMap<String, Arc<SubscriptionQueue>>>,
    next_id: AtomicU64,
}

/// Counters of one subscription, for inspection in tests and local runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Messages waiting to be delivered.
    pub pending: usize,
    /// Deliveries acknowledged so far.
    pub acked: u64,
}

/// In-process backend: named topics fan out to named subscriptions.
///
/// Cloning shares the same registry, so a test can keep a handle for
/// administration while the code under test owns another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    registry: Arc<Registry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic. Creating an existing topic is a no-op.
    pub async fn create_topic(&self, name: &str) {
        let mut topics = self.registry.topics.write().await;
        topics.entry(name.to_string()).or_default();
        tracing::debug!(topic = %name, "created topic");
    }

    /// Attach a new subscription to an existing topic.
    ///
    /// Only messages published after this call are delivered to it.
    /// Повторное создание на том же topic ничего не делает, на другом
    /// возвращает `AlreadyExists`.
    pub async fn create_subscription(&self, name: &str, topic: &str) -> Result<(), PubSubError> {
        let mut topics = self.registry.topics.write().await;
        let subs = topics
            .get_mut(topic)
            .ok_or_else(|| PubSubError::topic_not_found(topic))?;

        let mut registry_subs = self.registry.subscriptions.write().await;
        if let Some(existing) = registry_subs.get(name) {
            if existing.topic == topic {
                return Ok(());
            }
            return Err(PubSubError::AlreadyExists {
                kind: "subscription",
                name: name.to_string(),
                detail: format!("attached to topic '{}'", existing.topic),
            });
        }
        let queue = Arc::new(SubscriptionQueue::new(name.to_string(), topic.to_string()));
        subs.push(queue.clone());
        registry_subs.insert(name.to_string(), queue);
        tracing::debug!(subscription = %name, topic = %topic, "created subscription");
        Ok(())
    }

    pub async fn stats(&self, subscription: &str) -> Option<SubscriptionStats> {
        let subs = self.registry.subscriptions.read().await;
        subs.get(subscription).map(|q| SubscriptionStats {
            pending: q.lock().len(),
            acked: q.acked.load(Ordering::SeqCst),
        })
    }
}

impl Backend for MemoryBackend {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Client>, PubSubError>> + Send + '_>> {
        let client = MemoryClient {
            registry: self.registry.clone(),
        };
        Box::pin(async move { Ok(Arc::new(client) as Arc<dyn Client>) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryClient
// ═══════════════════════════════════════════════════════════════

struct MemoryClient {
    registry: Arc<Registry>,
}

impl MemoryClient {
    async fn publish_inner(&self, topic: &str, message: Message) -> Result<MessageId, PubSubError> {
        let topics = self.registry.topics.read().await;
        let subs = topics
            .get(topic)
            .ok_or_else(|| PubSubError::topic_not_found(topic))?;

        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = MessageId::new(id.to_string());
        let received = ReceivedMessage {
            id: id.clone(),
            message,
            publish_time: Some(SystemTime::now()),
        };
        // Topic без подписок принимает и отбрасывает.
        for sub in subs {
            sub.push_back(received.clone());
        }
        Ok(id)
    }

    async fn receive_inner(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Result<(), PubSubError> {
        let queue = {
            let subs = self.registry.subscriptions.read().await;
            subs.get(subscription)
                .cloned()
                .ok_or_else(|| PubSubError::subscription_not_found(subscription))?
        };

        loop {
            let msg = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                msg = queue.next() => msg,
            };
            let reply = MemoryAck {
                queue: queue.clone(),
                message: Some(msg.clone()),
            };
            handler.handle(Delivery::new(msg, Box::new(reply))).await;
        }
    }
}

impl Client for MemoryClient {
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
