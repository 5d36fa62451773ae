//! Client traits and connection factory for transport operations.

use crate::error::TransportError;
use crate::message::{
    AckHandle, MessageId, OutboundMessage, PullRequest, ReceivedMessage, SubscriptionName,
    TopicName,
};
use crate::provider::{ProviderType, TransportConfig};
use crate::providers::{InMemoryTransport, PubSubTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Pull/acknowledge interface of a message-queue transport.
///
/// Implementations own delivery, retention and redelivery after lease expiry;
/// callers only pull batches and acknowledge the handles they processed.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Pull up to `request.max_messages` messages from a subscription.
    ///
    /// With `return_immediately` set the call never waits for arrivals; an
    /// empty vector is a valid result, not an error.
    async fn pull(
        &self,
        subscription: &SubscriptionName,
        request: PullRequest,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Mark deliveries as consumed.
    ///
    /// Re-acknowledging an expired or already acknowledged handle is not a
    /// client-side error.
    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        handles: &[AckHandle],
    ) -> Result<(), TransportError>;

    /// Release transport resources. Safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Publishing side of a transport, used by the harness producer
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Publish messages to a topic, returning transport-assigned IDs in order
    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<MessageId>, TransportError>;
}

/// Lazily establishes a transport connection on first use
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a connection to the transport
    async fn connect(&self) -> Result<Arc<dyn QueueTransport>, TransportError>;
}

/// Factory for creating transports from configuration
#[derive(Debug, Clone)]
pub struct TransportFactory {
    config: TransportConfig,
}

impl TransportFactory {
    /// Create factory for the given provider configuration
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Get provider type this factory connects to
    pub fn provider_type(&self) -> ProviderType {
        self.config.provider_type()
    }

    /// Create a publisher for the configured provider
    pub fn create_publisher(&self) -> Result<Arc<dyn QueuePublisher>, TransportError> {
        match &self.config {
            TransportConfig::PubSub(pubsub_config) => {
                Ok(Arc::new(PubSubTransport::new(pubsub_config.clone())?))
            }
            TransportConfig::InMemory => Ok(Arc::new(InMemoryTransport::new())),
        }
    }
}

#[async_trait]
impl TransportConnector for TransportFactory {
    async fn connect(&self) -> Result<Arc<dyn QueueTransport>, TransportError> {
        let transport: Arc<dyn QueueTransport> = match &self.config {
            TransportConfig::PubSub(pubsub_config) => {
                Arc::new(PubSubTransport::new(pubsub_config.clone())?)
            }
            TransportConfig::InMemory => Arc::new(InMemoryTransport::new()),
        };

        info!(provider = %transport.provider_type(), "Transport connection established");
        Ok(transport)
    }
}

/// Connector that hands out an already constructed transport
pub struct SharedTransport {
    transport: Arc<dyn QueueTransport>,
}

impl SharedTransport {
    /// Wrap an existing transport
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TransportConnector for SharedTransport {
    async fn connect(&self) -> Result<Arc<dyn QueueTransport>, TransportError> {
        Ok(Arc::clone(&self.transport))
    }
}
