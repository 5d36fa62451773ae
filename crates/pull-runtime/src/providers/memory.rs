//! In-memory transport implementation for testing and development.
//!
//! This module provides a fully functional in-memory transport that:
//! - Keeps one FIFO queue per subscription
//! - Issues a fresh ack handle for every delivery
//! - Tracks in-flight deliveries until they are acknowledged or their lease expires
//! - Can inject pull/acknowledge failures and keeps a bounded log of the calls it receives
//!
//! This provider is intended for:
//! - Unit testing of priority consumers
//! - Development and prototyping without an emulator
//! - Reference implementation for cloud providers

use crate::client::{QueuePublisher, QueueTransport};
use crate::error::TransportError;
use crate::message::{
    AckHandle, MessageId, OutboundMessage, PullRequest, ReceivedMessage, SubscriptionName,
    Timestamp, TopicName,
};
use crate::provider::ProviderType;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Calls kept in the log by default; older entries are dropped first
pub const DEFAULT_CALL_LOG_CAPACITY: usize = 10_000;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in a subscription with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    payload: Bytes,
    attributes: HashMap<String, String>,
    published_at: Timestamp,
    delivery_count: u32,
}

/// A delivery waiting for acknowledgment
struct InFlightMessage {
    subscription: SubscriptionName,
    message: StoredMessage,
}

/// Mutable state shared by all transport operations
#[derive(Default)]
struct TransportState {
    queues: HashMap<SubscriptionName, VecDeque<StoredMessage>>,
    in_flight: HashMap<AckHandle, InFlightMessage>,
    pull_failures: HashMap<SubscriptionName, VecDeque<TransportError>>,
    ack_failures: HashMap<SubscriptionName, VecDeque<TransportError>>,
    calls: VecDeque<TransportCall>,
    call_log_capacity: usize,
}

impl TransportState {
    fn record(&mut self, call: TransportCall) {
        if self.call_log_capacity == 0 {
            return;
        }
        if self.calls.len() == self.call_log_capacity {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// A call received by the in-memory transport, recorded in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Pull {
        subscription: SubscriptionName,
        max_messages: u32,
    },
    Acknowledge {
        subscription: SubscriptionName,
        handles: Vec<AckHandle>,
    },
    Close,
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory transport implementation
pub struct InMemoryTransport {
    state: Mutex<TransportState>,
    next_handle: AtomicU64,
    closed: AtomicBool,
    close_count: AtomicU64,
}

impl InMemoryTransport {
    /// Create new empty in-memory transport
    pub fn new() -> Self {
        Self::with_call_log_capacity(DEFAULT_CALL_LOG_CAPACITY)
    }

    /// Create a transport that keeps at most `capacity` calls in its log
    pub fn with_call_log_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TransportState {
                call_log_capacity: capacity,
                ..Default::default()
            }),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportState> {
        // A poisoned lock only means a test panicked mid-operation; the data is still usable
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a payload onto a subscription, returning its message ID
    pub fn enqueue(&self, subscription: &SubscriptionName, payload: impl Into<Bytes>) -> MessageId {
        self.enqueue_message(subscription, OutboundMessage::new(payload))
    }

    /// Enqueue a full outbound message onto a subscription
    pub fn enqueue_message(
        &self,
        subscription: &SubscriptionName,
        message: OutboundMessage,
    ) -> MessageId {
        let message_id = MessageId::new();
        let stored = StoredMessage {
            message_id: message_id.clone(),
            payload: message.payload,
            attributes: message.attributes,
            published_at: Timestamp::now(),
            delivery_count: 0,
        };

        self.lock()
            .queues
            .entry(subscription.clone())
            .or_default()
            .push_back(stored);

        message_id
    }

    /// Number of messages waiting for delivery on a subscription
    pub fn pending_count(&self, subscription: &SubscriptionName) -> usize {
        self.lock()
            .queues
            .get(subscription)
            .map_or(0, VecDeque::len)
    }

    /// Number of deliveries that have not been acknowledged yet
    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Make every unacknowledged delivery available again, as if its lease expired.
    ///
    /// Returns the number of redelivered messages.
    pub fn expire_leases(&self) -> usize {
        let mut state = self.lock();
        let expired: Vec<InFlightMessage> = state.in_flight.drain().map(|(_, m)| m).collect();
        let count = expired.len();

        for in_flight in expired {
            state
                .queues
                .entry(in_flight.subscription)
                .or_default()
                .push_front(in_flight.message);
        }

        count
    }

    /// Fail the next pull on `subscription` with `error`
    pub fn fail_next_pull(&self, subscription: &SubscriptionName, error: TransportError) {
        self.lock()
            .pull_failures
            .entry(subscription.clone())
            .or_default()
            .push_back(error);
    }

    /// Fail the next acknowledgment on `subscription` with `error`
    pub fn fail_next_acknowledge(&self, subscription: &SubscriptionName, error: TransportError) {
        self.lock()
            .ack_failures
            .entry(subscription.clone())
            .or_default()
            .push_back(error);
    }

    /// Most recent calls received, oldest first
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.iter().cloned().collect()
    }

    /// Pull calls received so far, as `(subscription, max_messages)`
    pub fn pull_calls(&self) -> Vec<(SubscriptionName, u32)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Pull {
                    subscription,
                    max_messages,
                } => Some((subscription.clone(), *max_messages)),
                _ => None,
            })
            .collect()
    }

    /// Acknowledge calls received so far, as `(subscription, handles)`
    pub fn acknowledge_calls(&self) -> Vec<(SubscriptionName, Vec<AckHandle>)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Acknowledge {
                    subscription,
                    handles,
                } => Some((subscription.clone(), handles.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of times `close` has been called
    pub fn close_count(&self) -> u64 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Check if the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn pull(
        &self,
        subscription: &SubscriptionName,
        request: PullRequest,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        self.ensure_open()?;

        let mut state = self.lock();
        state.record(TransportCall::Pull {
            subscription: subscription.clone(),
            max_messages: request.max_messages,
        });

        if let Some(error) = state
            .pull_failures
            .get_mut(subscription)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut delivered = Vec::new();
        while delivered.len() < request.max_messages as usize {
            let Some(mut stored) = state
                .queues
                .get_mut(subscription)
                .and_then(VecDeque::pop_front)
            else {
                break;
            };

            stored.delivery_count += 1;
            let sequence = self.next_handle.fetch_add(1, Ordering::SeqCst);
            let handle = AckHandle::new(format!("{}:{}", subscription, sequence));

            let mut message = ReceivedMessage::new(handle.clone(), stored.payload.clone())
                .with_message_id(stored.message_id.clone())
                .with_publish_time(stored.published_at)
                .with_delivery_attempt(stored.delivery_count);
            message.attributes = stored.attributes.clone();
            delivered.push(message);

            state.in_flight.insert(
                handle,
                InFlightMessage {
                    subscription: subscription.clone(),
                    message: stored,
                },
            );
        }

        Ok(delivered)
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        handles: &[AckHandle],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut state = self.lock();
        state.record(TransportCall::Acknowledge {
            subscription: subscription.clone(),
            handles: handles.to_vec(),
        });

        if let Some(error) = state
            .ack_failures
            .get_mut(subscription)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        for handle in handles {
            // Unknown or expired handles are ignored, matching the cloud transports
            let belongs_here = state
                .in_flight
                .get(handle)
                .is_some_and(|m| &m.subscription == subscription);
            if belongs_here {
                state.in_flight.remove(handle);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.lock().record(TransportCall::Close);
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[async_trait]
impl QueuePublisher for InMemoryTransport {
    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<MessageId>, TransportError> {
        self.ensure_open()?;

        // Every topic is delivered to the subscription of the same name
        let subscription = SubscriptionName::new(topic.as_str())?;
        Ok(messages
            .into_iter()
            .map(|message| self.enqueue_message(&subscription, message))
            .collect())
    }
}
