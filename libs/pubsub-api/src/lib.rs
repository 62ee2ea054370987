//! Backend-neutral pub/sub types and traits shared by the publisher and
//! subscriber binaries and the backend implementations.

mod client;
mod error;
mod message;

pub use client::{Backend, Client, MessageHandler};
pub use error::PubSubError;
pub use message::{AckReply, Delivery, Message, MessageId, ReceivedMessage};
