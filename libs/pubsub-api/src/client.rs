use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{Delivery, Message, MessageId, PubSubError};

// ════════════════════════════════════════════════════════════════
//  Backend traits
// ════════════════════════════════════════════════════════════════

/// Factory for backend connections, bound to one project.
///
/// Implementations: MemoryBackend (in-process), RestBackend (Pub/Sub v1 REST).
pub trait Backend: Send + Sync {
    /// Открыть новое подключение. Publisher вызывает на каждый запрос,
    /// subscriber один раз на процесс.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Client>, PubSubError>> + Send + '_>>;
}

/// Connection to the messaging service.
pub trait Client: Send + Sync {
    /// Publish one message and wait for the server-generated id.
    fn publish(&self, topic: &str, message: Message)
        -> Pin<Box<dyn Future<Output = Result<MessageId, PubSubError>> + Send + '_>>;

    /// Streaming pull из `subscription`, `handler` на каждую доставку.
    ///
    /// Работает до отмены `token` (→ `Ok(())`) или ошибки backend'а.
    /// После замеченной отмены новые вызовы handler'а не начинаются,
    /// а уже отправленные ack'и доходят до backend'а до возврата.
    fn receive(
        &self,
        subscription: &str,
        handler: Arc<dyn MessageHandler>,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PubSubError>> + Send + '_>>;
}

/// Application callback invoked once per delivered message.
///
/// Takes only backend-free types so it can be driven by synthetic deliveries.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, delivery: Delivery) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
