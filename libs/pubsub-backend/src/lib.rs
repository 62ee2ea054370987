//! Pub/sub backend implementations behind the `pubsub-api` traits.
//!
//! - [`RestBackend`]: Google Pub/Sub v1 REST surface (or its emulator).
//! - [`MemoryBackend`]: in-process topics and subscriptions.

pub mod config;
mod memory;
mod rest;
mod wire;

pub use config::{Auth, RestConfig};
pub use memory::{MemoryBackend, SubscriptionStats};
pub use rest::RestBackend;
