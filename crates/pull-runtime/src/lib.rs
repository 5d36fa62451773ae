//! # Pull Runtime
//!
//! Pull/acknowledge transport runtime used by the priority pull consumer, with
//! Google Cloud Pub/Sub (hosted or emulator) and in-memory implementations.
//!
//! This library provides:
//! - Provider-agnostic pull, acknowledge and publish operations
//! - Validated subscription and topic names
//! - Lazy connection establishment through [`TransportConnector`]
//! - An in-memory transport that records calls and injects failures for tests
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Message structures and ack handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Transport traits and the connection factory
//! - [`providers`] - Pub/Sub and in-memory transports

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{
    QueuePublisher, QueueTransport, SharedTransport, TransportConnector, TransportFactory,
};
pub use error::{ConfigurationError, SerializationError, TransportError, ValidationError};
pub use message::{
    AckHandle, MessageId, OutboundMessage, PullRequest, ReceivedMessage, SubscriptionName,
    Timestamp, TopicName,
};
pub use provider::{ProviderType, PubSubConfig, TransportConfig, DEFAULT_PUBSUB_ENDPOINT};
pub use providers::{InMemoryTransport, PubSubTransport, TransportCall};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
