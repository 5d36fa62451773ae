//! Queue identities and the priority order they are polled in.

use crate::error::ConfigError;
use pull_runtime::{ReceivedMessage, SubscriptionName, Timestamp};
use std::collections::HashSet;
use std::fmt;

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// A subscription together with its priority rank.
///
/// Rank 0 is the highest priority. In the two-queue setup rank 0 is the
/// primary ("normal") queue and rank 1 the secondary ("overflow") queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueIdentity {
    pub name: SubscriptionName,
    pub rank: usize,
}

impl QueueIdentity {
    /// Create a queue identity with an explicit rank
    pub fn new(name: SubscriptionName, rank: usize) -> Self {
        Self { name, rank }
    }

    /// Create the rank 0 identity
    pub fn primary(name: SubscriptionName) -> Self {
        Self::new(name, 0)
    }

    /// Create the rank 1 identity
    pub fn secondary(name: SubscriptionName) -> Self {
        Self::new(name, 1)
    }

    /// Get the human readable role of this queue
    pub fn label(&self) -> String {
        match self.rank {
            0 => "primary".to_string(),
            1 => "secondary".to_string(),
            rank => format!("tier-{}", rank),
        }
    }
}

impl fmt::Display for QueueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.label())
    }
}

/// Ordered list of queues consulted top to bottom in every poll cycle.
///
/// Always holds at least one queue and never the same subscription twice.
/// The order is fixed for the lifetime of a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityOrder {
    queues: Vec<QueueIdentity>,
}

impl PriorityOrder {
    /// Build an order from subscriptions listed highest priority first
    pub fn new(subscriptions: Vec<SubscriptionName>) -> Result<Self, ConfigError> {
        if subscriptions.is_empty() {
            return Err(ConfigError::invalid(
                "subscriptions",
                "at least one subscription is required",
            ));
        }

        let mut seen = HashSet::new();
        for name in &subscriptions {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::invalid(
                    "subscriptions",
                    format!("subscription '{}' is listed more than once", name),
                ));
            }
        }

        let queues = subscriptions
            .into_iter()
            .enumerate()
            .map(|(rank, name)| QueueIdentity::new(name, rank))
            .collect();

        Ok(Self { queues })
    }

    /// Build the standard primary/secondary order
    pub fn dual(
        primary: SubscriptionName,
        secondary: SubscriptionName,
    ) -> Result<Self, ConfigError> {
        Self::new(vec![primary, secondary])
    }

    /// Get the queues in polling order
    pub fn queues(&self) -> &[QueueIdentity] {
        &self.queues
    }

    /// Get the highest priority queue
    pub fn primary(&self) -> &QueueIdentity {
        // Construction guarantees at least one queue
        &self.queues[0]
    }

    /// Find the identity of a subscription in this order
    pub fn find(&self, name: &SubscriptionName) -> Option<&QueueIdentity> {
        self.queues.iter().find(|q| &q.name == name)
    }
}

/// Messages received by one pull, tagged with their source and receipt instant
#[derive(Debug, Clone)]
pub struct PollBatch {
    pub queue: QueueIdentity,
    pub messages: Vec<ReceivedMessage>,
    pub received_at: Timestamp,
}

impl PollBatch {
    /// Create a batch stamped with the current instant
    pub fn received_now(queue: QueueIdentity, messages: Vec<ReceivedMessage>) -> Self {
        Self {
            queue,
            messages,
            received_at: Timestamp::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
