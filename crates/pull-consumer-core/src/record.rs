//! Per-message observability records and the observers that receive them.

use crate::latency::{DecodedPayload, LatencyReport, TraversalTime};
use crate::queue::QueueIdentity;
use pull_runtime::{AckHandle, MessageId, Timestamp};
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

/// Everything known about one processed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub queue: QueueIdentity,
    pub ack_handle: AckHandle,
    pub message_id: Option<MessageId>,
    pub decoded: DecodedPayload,
    pub received_at: Timestamp,
    pub traversal: Option<TraversalTime>,
}

impl MessageRecord {
    /// Build a record from an analyzed delivery
    pub fn new(
        queue: QueueIdentity,
        ack_handle: AckHandle,
        message_id: Option<MessageId>,
        report: LatencyReport,
        received_at: Timestamp,
    ) -> Self {
        Self {
            queue,
            ack_handle,
            message_id,
            decoded: report.decoded,
            received_at,
            traversal: report.traversal,
        }
    }

    pub fn content(&self) -> &str {
        self.decoded.display_text()
    }

    pub fn published_at(&self) -> Option<Timestamp> {
        self.decoded.published_at()
    }

    pub fn is_high_latency(&self) -> bool {
        self.traversal.is_some_and(|t| t.high_latency)
    }
}

impl fmt::Display for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} handle={} content={:?}",
            self.queue.label(),
            self.queue.name,
            self.ack_handle,
            self.content()
        )?;

        if let (Some(published_at), Some(traversal)) = (self.published_at(), self.traversal) {
            write!(
                f,
                " published={} received={} traversal={}",
                published_at, self.received_at, traversal
            )?;
            if traversal.high_latency {
                f.write_str(" HIGH LATENCY")?;
            }
        }

        Ok(())
    }
}

/// Receives a record for every processed message, in processing order
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, record: &MessageRecord);
}

/// Emits records as structured `tracing` events; high latency at WARN
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MessageObserver for TracingObserver {
    fn on_message(&self, record: &MessageRecord) {
        let published_at = record.published_at().map(|t| t.to_string());
        let traversal_ms = record.traversal.map(|t| t.millis);
        let message_type = match &record.decoded {
            DecodedPayload::Structured { message_type, .. } => message_type.as_deref(),
            DecodedPayload::Opaque { .. } => None,
        };

        let message_id = record.message_id.as_ref().map(MessageId::as_str);
        let high_latency = record.is_high_latency();

        if high_latency {
            warn!(
                queue = %record.queue.label(),
                subscription = %record.queue.name,
                ack_handle = %record.ack_handle,
                message_id = ?message_id,
                message_type = ?message_type,
                content = %record.content(),
                published_at = ?published_at,
                received_at = %record.received_at,
                traversal_ms = ?traversal_ms,
                high_latency = high_latency,
                "High latency message received"
            );
        } else {
            info!(
                queue = %record.queue.label(),
                subscription = %record.queue.name,
                ack_handle = %record.ack_handle,
                message_id = ?message_id,
                message_type = ?message_type,
                content = %record.content(),
                published_at = ?published_at,
                received_at = %record.received_at,
                traversal_ms = ?traversal_ms,
                high_latency = high_latency,
                "Message received"
            );
        }
    }
}

/// Keeps every record in memory, for assertions in tests
#[derive(Debug, Default)]
pub struct MemoryObserver {
    records: Mutex<Vec<MessageRecord>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all records received so far, in order
    pub fn records(&self) -> Vec<MessageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageObserver for MemoryObserver {
    fn on_message(&self, record: &MessageRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}
