//! # Pull Consumer Core
//!
//! Dual-queue priority pull consumer for message-queue test harnesses.
//!
//! The consumer drains a primary ("normal") subscription ahead of a secondary
//! ("overflow") one, measures how long each message spent in the queue and
//! keeps going through transient transport errors.
//!
//! ## Architecture
//!
//! - [`consumer`] - the polling loop and its counters
//! - [`latency`] - payload decoding and traversal time
//! - [`backoff`] - pauses between unproductive cycles
//! - [`ack`] - acknowledgment dispatch
//! - [`record`] - per-message observability records
//! - [`config`] - layered configuration
//! - [`producer`] - test-message publishing
//! - [`shutdown`] - cooperative shutdown signalling
//!
//! The transport is reached only through the `pull-runtime` traits, so the
//! same loop runs against the Pub/Sub emulator and the in-memory transport.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pull_consumer_core::{ConsumerConfig, PriorityConsumer, Shutdown};
//! use pull_runtime::TransportFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConsumerConfig::load(None)?;
//! config.validate()?;
//!
//! let mut consumer = PriorityConsumer::new(
//!     Arc::new(TransportFactory::new(config.transport_config())),
//!     config.priority_order()?,
//!     config.consumer_settings(),
//! )?;
//! let summary = consumer.run(Shutdown::never()).await;
//! println!("received {}", summary.counters.received_count);
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod error;
pub mod latency;
pub mod producer;
pub mod queue;
pub mod record;
pub mod shutdown;

pub use ack::AckOutcome;
pub use backoff::{BackoffScheduler, PauseReason};
pub use config::{ConfigFormat, ConfigLoader, ConfigOverrides, ConsumerConfig};
pub use consumer::{
    ConsumerSettings, ConsumerState, ConsumerSummary, CycleOutcome, PriorityConsumer,
    SessionCounters, TerminationReason,
};
pub use error::{ConfigError, ConsumerError, PublishError};
pub use latency::{DecodedPayload, LatencyAnalyzer, LatencyReport, TraversalTime};
pub use producer::{PayloadMode, PublishRequest, TestMessage, TestProducer};
pub use queue::{PollBatch, PriorityOrder, QueueIdentity};
pub use record::{MemoryObserver, MessageObserver, MessageRecord, TracingObserver};
pub use shutdown::{Shutdown, ShutdownTrigger};
