//! Common test utilities for pull consumer integration tests
//!
//! This module provides:
//! - A consumer wired to a shared in-memory transport with a recording observer
//! - Builders for structured and plain test payloads

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pull_consumer_core::{
    BackoffScheduler, ConsumerSettings, MemoryObserver, PriorityConsumer, PriorityOrder,
};
use pull_runtime::{InMemoryTransport, SharedTransport, SubscriptionName, Timestamp};
use std::sync::Arc;
use std::time::Duration;

pub const PRIMARY: &str = "orders";
pub const SECONDARY: &str = "orders-overflow";

#[allow(dead_code)]
pub fn subscription(name: &str) -> SubscriptionName {
    SubscriptionName::new(name).unwrap()
}

/// JSON body in the shape the harness producer publishes
#[allow(dead_code)]
pub fn structured_payload(content: &str, published_at: DateTime<Utc>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "content": content,
        "timestamp": Timestamp::from_datetime(published_at).to_string(),
        "messageType": "single",
        "id": "k3j9x0a1b",
    }))
    .unwrap()
}

/// Structured payload published `age` before now
#[allow(dead_code)]
pub fn aged_payload(content: &str, age: Duration) -> Vec<u8> {
    let age = ChronoDuration::from_std(age).unwrap();
    structured_payload(content, Utc::now() - age)
}

/// Consumer over a shared in-memory transport with a recording observer
pub struct Harness {
    pub transport: Arc<InMemoryTransport>,
    pub observer: Arc<MemoryObserver>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(InMemoryTransport::new()),
            observer: Arc::new(MemoryObserver::new()),
        }
    }

    #[allow(dead_code)]
    pub fn primary(&self) -> SubscriptionName {
        subscription(PRIMARY)
    }

    #[allow(dead_code)]
    pub fn secondary(&self) -> SubscriptionName {
        subscription(SECONDARY)
    }

    /// Settings with a short fixed pause so paused-clock tests stay readable
    #[allow(dead_code)]
    pub fn settings(&self, batch_size: u32, pull_limit: Option<u64>) -> ConsumerSettings {
        ConsumerSettings {
            batch_size,
            pull_limit,
            backoff: BackoffScheduler::fixed(Duration::from_millis(500)),
            ..Default::default()
        }
    }

    pub fn consumer(&self, settings: ConsumerSettings) -> PriorityConsumer {
        let order = PriorityOrder::dual(self.primary(), self.secondary()).unwrap();
        PriorityConsumer::new(
            Arc::new(SharedTransport::new(self.transport.clone())),
            order,
            settings,
        )
        .unwrap()
        .with_observer(self.observer.clone())
    }
}
