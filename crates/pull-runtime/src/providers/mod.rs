//! Transport provider implementations.
//!
//! This module contains concrete implementations of the `QueueTransport` and
//! `QueuePublisher` traits for the supported backends.

pub mod memory;
pub mod pubsub;

pub use memory::{InMemoryTransport, TransportCall};
pub use pubsub::PubSubTransport;
