use std::future::Future;
use std::pin::Pin;

use pubsub_api::{Delivery, MessageHandler};

/// Логирует payload и attributes каждой доставки, затем делает ack.
pub struct LogHandler;

impl MessageHandler for LogHandler {
    fn handle(&self, delivery: Delivery) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(msg_id = %delivery.id(), data = %quote_bytes(delivery.data()), "got data");
            tracing::info!(
                msg_id = %delivery.id(),
                attributes = ?delivery.attributes(),
                "got attributes"
            );
            delivery.ack();
        })
    }
}

/// Quoted, escaped rendering that preserves every byte of a non-UTF-8 payload.
pub fn quote_bytes(data: &[u8]) -> String {
    format!("\"{}\"", data.escape_ascii())
}
