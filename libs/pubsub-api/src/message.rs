use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

// ════════════════════════════════════════════════════════════════
//  Message
// ════════════════════════════════════════════════════════════════

/// Opaque payload plus string attributes.
///
/// Attributes отсортированы, поэтому лог сообщения детерминирован.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter. A repeated key overwrites the old value.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ════════════════════════════════════════════════════════════════
//  MessageId
// ════════════════════════════════════════════════════════════════

/// Server-generated receipt for a durably accepted message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  Delivery
// ════════════════════════════════════════════════════════════════

/// Message as seen by a subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub message: Message,
    /// None when the backend does not report a publish time.
    pub publish_time: Option<SystemTime>,
}

/// Backend-сторона ack. Вызывается не более одного раза на доставку.
pub trait AckReply: Send {
    fn ack(self: Box<Self>);
}

/// A received message together with the right to acknowledge it.
///
/// `ack` consumes the delivery. Dropping a delivery without acknowledging it
/// leaves redelivery up to the backend.
pub struct Delivery {
    message: ReceivedMessage,
    reply: Box<dyn AckReply>,
}

impl Delivery {
    pub fn new(message: ReceivedMessage, reply: Box<dyn AckReply>) -> Self {
        Self { message, reply }
    }

    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    pub fn data(&self) -> &[u8] {
        &self.message.message.data
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.message.message.attributes
    }

    pub fn ack(self) {
        self.reply.ack();
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReply(Arc<AtomicUsize>);

    impl AckReply for CountingReply {
        fn ack(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn attributes_are_sorted_and_overwritten() {
        let msg = Message::new("payload")
            .with_attribute("username", "gcp")
            .with_attribute("origin", "x")
            .with_attribute("origin", "rust");

        let keys: Vec<_> = msg.attributes.keys().cloned().collect();
        assert_eq!(keys, vec!["origin", "username"]);
        assert_eq!(msg.attributes["origin"], "rust");
        assert_eq!(msg.data, b"payload");
    }

    #[test]
    fn delivery_ack_reaches_backend_once() {
        let acks = Arc::new(AtomicUsize::new(0));
        let delivery = Delivery::new(
            ReceivedMessage {
                id: MessageId::new("42"),
                message: Message::new(vec![0u8, 159, 146, 150]),
                publish_time: None,
            },
            Box::new(CountingReply(acks.clone())),
        );

        assert_eq!(delivery.id().as_str(), "42");
        assert_eq!(delivery.data(), &[0u8, 159, 146, 150]);
        delivery.ack();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn message_id_displays_raw_value() {
        assert_eq!(MessageId::new("1234567890").to_string(), "1234567890");
    }
}
