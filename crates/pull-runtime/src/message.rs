//! Message types for transport operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validate a subscription or topic name against the Pub/Sub resource rules.
///
/// Names are 3-255 characters, start with an ASCII letter, contain only
/// `[A-Za-z0-9-_.~+%]` and must not start with `goog`.
fn validate_resource_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.len() < 3 || name.len() > 255 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: "must be 3-255 characters".to_string(),
        });
    }

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must start with a letter".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '+' | '%'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric and '-_.~+%' allowed".to_string(),
        });
    }

    if name.starts_with("goog") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "the 'goog' prefix is reserved".to_string(),
        });
    }

    Ok(())
}

/// Validated name of a subscription that messages are pulled from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionName(String);

impl SubscriptionName {
    /// Create new subscription name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_resource_name("subscription_name", &name)?;
        Ok(Self(name))
    }

    /// Get subscription name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubscriptionName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubscriptionName> for String {
    fn from(value: SubscriptionName) -> Self {
        value.0
    }
}

/// Validated name of a topic that messages are published to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicName(String);

impl TopicName {
    /// Create new topic name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_resource_name("topic_name", &name)?;
        Ok(Self(name))
    }

    /// Get topic name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TopicName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicName> for String {
    fn from(value: TopicName) -> Self {
        value.0
    }
}

/// Transport-assigned identifier of a published message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = DateTime::parse_from_rfc3339(s)?;
        Ok(Self::from_datetime(dt.with_timezone(&Utc)))
    }
}

// ============================================================================
// Delivery Handles
// ============================================================================

/// Opaque token identifying one delivery attempt of a message.
///
/// Required to acknowledge the delivery. A redelivery of the same message
/// carries a different handle, so handles are never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle(String);

impl AckHandle {
    /// Wrap a transport-issued token
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string as issued by the transport
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be published through the transport
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub attributes: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create new message with payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A single delivery pulled from a subscription
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub ack_handle: AckHandle,
    pub message_id: Option<MessageId>,
    pub payload: Bytes,
    pub attributes: HashMap<String, String>,
    /// Transport-side publish instant, when the transport reports one
    pub publish_time: Option<Timestamp>,
    pub delivery_attempt: Option<u32>,
}

impl ReceivedMessage {
    /// Create a delivery with only a handle and payload
    pub fn new(ack_handle: AckHandle, payload: impl Into<Bytes>) -> Self {
        Self {
            ack_handle,
            message_id: None,
            payload: payload.into(),
            attributes: HashMap::new(),
            publish_time: None,
            delivery_attempt: None,
        }
    }

    /// Set transport message ID
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }

    /// Set transport publish time
    pub fn with_publish_time(mut self, publish_time: Timestamp) -> Self {
        self.publish_time = Some(publish_time);
        self
    }

    /// Set delivery attempt counter
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }
}

// ============================================================================
// Pull Options
// ============================================================================

/// Parameters of a single pull call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest {
    /// Maximum number of messages to return (at least 1)
    pub max_messages: u32,
    /// Return straight away when no messages are available
    pub return_immediately: bool,
}

impl PullRequest {
    /// Create a non-blocking pull request for up to `max_messages`
    pub fn immediate(max_messages: u32) -> Result<Self, ValidationError> {
        if max_messages == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            max_messages,
            return_immediately: true,
        })
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
