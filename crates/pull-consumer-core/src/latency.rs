//! # Latency Analysis
//!
//! Extracts the producer-recorded publish instant from a message payload and
//! computes how long the message spent traversing the queue.
//!
//! Payloads written by the harness producer are JSON objects:
//!
//! ```json
//! {"content": "Test message", "timestamp": "2024-03-01T12:00:00.000Z", "messageType": "single", "id": "k3x9a1"}
//! ```
//!
//! `content` and `timestamp` are required; `messageType` and `id` are optional.
//! Anything else is treated as opaque text. Decoding never fails.

use chrono::{DateTime, Utc};
use pull_runtime::Timestamp;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

#[cfg(test)]
#[path = "latency_tests.rs"]
mod tests;

/// Traversal time above which a message is flagged as high latency
pub const DEFAULT_HIGH_LATENCY_THRESHOLD: Duration = Duration::from_millis(5000);

/// Result of decoding a message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPayload {
    /// Payload carried a content string and a publish timestamp
    Structured {
        content: String,
        published_at: Timestamp,
        message_type: Option<String>,
        producer_id: Option<String>,
    },

    /// Payload could not be decoded; the whole payload as text
    Opaque { text: String },
}

impl DecodedPayload {
    /// Decode raw payload bytes, falling back to lossy UTF-8 text
    pub fn decode(payload: &[u8]) -> Self {
        Self::decode_structured(payload).unwrap_or_else(|| Self::Opaque {
            text: String::from_utf8_lossy(payload).into_owned(),
        })
    }

    fn decode_structured(payload: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(payload).ok()?;
        let object = value.as_object()?;

        let content = object.get("content")?.as_str()?;
        let published_at = DateTime::parse_from_rfc3339(object.get("timestamp")?.as_str()?)
            .ok()?
            .with_timezone(&Utc);

        let optional_text = |key: &str| object.get(key).and_then(Value::as_str).map(String::from);

        Some(Self::Structured {
            content: content.to_string(),
            published_at: Timestamp::from_datetime(published_at),
            message_type: optional_text("messageType"),
            producer_id: optional_text("id"),
        })
    }

    /// Get the text shown for this payload
    pub fn display_text(&self) -> &str {
        match self {
            Self::Structured { content, .. } => content,
            Self::Opaque { text } => text,
        }
    }

    /// Get the producer-recorded publish instant, when present
    pub fn published_at(&self) -> Option<Timestamp> {
        match self {
            Self::Structured { published_at, .. } => Some(*published_at),
            Self::Opaque { .. } => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Time between publish and receipt of a message.
///
/// Negative values mean the producer clock is ahead of the consumer clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalTime {
    pub millis: i64,
    pub high_latency: bool,
}

impl fmt::Display for TraversalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

/// Decoded payload plus its traversal time, if one could be computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyReport {
    pub decoded: DecodedPayload,
    pub traversal: Option<TraversalTime>,
}

impl LatencyReport {
    pub fn is_high_latency(&self) -> bool {
        self.traversal.is_some_and(|t| t.high_latency)
    }
}

/// Stateless payload decoder and traversal time calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyAnalyzer {
    threshold: Duration,
}

impl Default for LatencyAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_LATENCY_THRESHOLD)
    }
}

impl LatencyAnalyzer {
    /// Create an analyzer flagging traversal times strictly above `threshold`
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Decode `payload` and compute its traversal time relative to `received_at`
    pub fn analyze(&self, payload: &[u8], received_at: Timestamp) -> LatencyReport {
        let decoded = DecodedPayload::decode(payload);
        let traversal = decoded
            .published_at()
            .map(|published_at| self.traversal(published_at, received_at));

        LatencyReport { decoded, traversal }
    }

    /// Compute signed traversal time between two instants
    pub fn traversal(&self, published_at: Timestamp, received_at: Timestamp) -> TraversalTime {
        let millis = (received_at.as_datetime() - published_at.as_datetime()).num_milliseconds();
        let threshold_millis = i64::try_from(self.threshold.as_millis()).unwrap_or(i64::MAX);

        TraversalTime {
            millis,
            high_latency: millis > threshold_millis,
        }
    }
}
