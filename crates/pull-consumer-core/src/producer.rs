//! Test-message producer for exercising the consumer end to end.
//!
//! Structured messages carry the publish instant so the consumer can measure
//! traversal time; plain messages exercise the opaque payload path.

use crate::error::PublishError;
use pull_runtime::{MessageId, OutboundMessage, QueuePublisher, Timestamp, TopicName};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Text published by plain mode when no content is given
pub const DEFAULT_PLAIN_TEXT: &str = "Hello, world!";

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LENGTH: usize = 9;

/// JSON body of a structured test message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMessage {
    pub content: String,
    pub timestamp: String,
    pub message_type: String,
    pub id: String,
}

/// How test payloads are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// JSON with content and publish timestamp
    Structured,
    /// Raw text with no timing information
    Plain,
}

/// What to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub count: u32,
    pub content: Option<String>,
    pub mode: PayloadMode,
}

impl PublishRequest {
    fn content(&self) -> &str {
        match (&self.content, self.mode) {
            (Some(content), _) => content,
            (None, PayloadMode::Plain) => DEFAULT_PLAIN_TEXT,
            (None, PayloadMode::Structured) if self.count == 1 => "Single message",
            (None, PayloadMode::Structured) => "Batch message",
        }
    }

    /// Build the outbound messages, stamping structured ones with `now`
    pub fn build(&self, now: Timestamp) -> Result<Vec<OutboundMessage>, PublishError> {
        if self.count == 0 {
            return Err(PublishError::EmptyBatch);
        }

        let content = self.content();
        (1..=self.count)
            .map(|index| match self.mode {
                PayloadMode::Plain => Ok(OutboundMessage::new(content.to_string())),
                PayloadMode::Structured => {
                    let message = if self.count == 1 {
                        TestMessage::new(content.to_string(), "single", now)
                    } else {
                        TestMessage::new(
                            format!("{} {}/{}", content, index, self.count),
                            "batch",
                            now,
                        )
                    };
                    serde_json::to_vec(&message)
                        .map(OutboundMessage::new)
                        .map_err(PublishError::from)
                }
            })
            .collect()
    }
}

impl TestMessage {
    pub fn new(content: String, message_type: &str, published_at: Timestamp) -> Self {
        Self {
            content,
            timestamp: published_at.to_string(),
            message_type: message_type.to_string(),
            id: short_id(),
        }
    }
}

fn short_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
        .collect()
}

/// Publishes test messages through any [`QueuePublisher`]
pub struct TestProducer {
    publisher: Arc<dyn QueuePublisher>,
}

impl TestProducer {
    pub fn new(publisher: Arc<dyn QueuePublisher>) -> Self {
        Self { publisher }
    }

    /// Publish `request` to `topic`, returning the transport-assigned IDs
    pub async fn publish(
        &self,
        topic: &TopicName,
        request: &PublishRequest,
    ) -> Result<Vec<MessageId>, PublishError> {
        let messages = request.build(Timestamp::now())?;
        let ids = self.publisher.publish(topic, messages).await?;

        for id in &ids {
            info!(topic = %topic, message_id = %id, "Message published");
        }
        Ok(ids)
    }
}
