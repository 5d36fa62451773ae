//! # Priority Consumer
//!
//! Polling loop that drains higher-priority queues ahead of lower-priority
//! ones.
//!
//! Each cycle walks the [`PriorityOrder`] top to bottom and stops at the first
//! queue that returns messages:
//!
//! ```text
//! Idle -> Polling{0} --empty--> Polling{1} --empty--> Waiting -> Idle
//!              |                     |
//!              +-----messages--------+--> Processing -> Acknowledging -> CheckLimit
//!                                                                          |
//!                                                      Terminal <--limit---+---> Idle
//! ```
//!
//! Any transport error aborts the cycle and moves to `Waiting`. The next cycle
//! starts again at the highest priority queue.

use crate::ack::{self, AckOutcome};
use crate::backoff::{pause_millis, BackoffScheduler, PauseReason};
use crate::error::{ConfigError, ConsumerError};
use crate::latency::LatencyAnalyzer;
use crate::queue::{PollBatch, PriorityOrder, QueueIdentity};
use crate::record::{MessageObserver, MessageRecord, TracingObserver};
use crate::shutdown::Shutdown;
use pull_runtime::{
    AckHandle, PullRequest, QueueTransport, ReceivedMessage, TransportConnector,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Default number of messages requested per pull
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Observable state of the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Polling { rank: usize },
    Processing,
    Acknowledging,
    CheckLimit,
    Waiting,
    Terminal,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Polling { rank } => write!(f, "polling(rank={})", rank),
            Self::Processing => f.write_str("processing"),
            Self::Acknowledging => f.write_str("acknowledging"),
            Self::CheckLimit => f.write_str("check_limit"),
            Self::Waiting => f.write_str("waiting"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

/// Counters owned by one consumer instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Messages processed and acknowledged; never exceeds the pull limit
    pub received_count: u64,

    /// Cycles in a row in which every queue was empty
    pub consecutive_empty_polls: u32,

    /// Cycles started
    pub cycles: u64,

    /// Messages acknowledged successfully
    pub acknowledged_count: u64,

    /// Failed connects and pulls
    pub pull_failures: u64,

    /// Failed acknowledgment calls
    pub ack_failures: u64,

    /// Cycles in a row that ended in a transport error
    pub consecutive_failures: u32,

    /// Messages flagged as high latency
    pub high_latency_count: u64,
}

/// Why the consumer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    PullLimitReached,
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullLimitReached => f.write_str("pull limit reached"),
            Self::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// Final report of a consumer run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub counters: SessionCounters,
    pub reason: TerminationReason,
}

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch was processed and acknowledged
    Processed { queue: QueueIdentity, count: usize },
    /// Every queue returned an empty batch
    Empty,
    /// The pull limit was already reached; nothing was pulled
    LimitReached,
}

/// Tuning of a consumer loop
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Messages requested per pull (at least 1)
    pub batch_size: u32,

    /// Total messages to receive before stopping; `None` runs until shutdown
    pub pull_limit: Option<u64>,

    pub backoff: BackoffScheduler,
    pub analyzer: LatencyAnalyzer,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pull_limit: None,
            backoff: BackoffScheduler::default(),
            analyzer: LatencyAnalyzer::default(),
        }
    }
}

impl ConsumerSettings {
    /// Check the settings can drive a consumer
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "max_messages_per_pull",
                "must be at least 1",
            ));
        }
        if self.pull_limit == Some(0) {
            return Err(ConfigError::invalid(
                "pull_limit",
                "must be at least 1; omit it to run until shutdown",
            ));
        }
        Ok(())
    }
}

/// Dual-queue (or N-queue) priority pull consumer
pub struct PriorityConsumer {
    connector: Arc<dyn TransportConnector>,
    transport: Option<Arc<dyn QueueTransport>>,
    order: PriorityOrder,
    settings: ConsumerSettings,
    observer: Arc<dyn MessageObserver>,
    counters: SessionCounters,
    state: ConsumerState,
    termination: Option<TerminationReason>,
}

impl PriorityConsumer {
    /// Create a consumer. The transport is connected on the first cycle.
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        order: PriorityOrder,
        settings: ConsumerSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        Ok(Self {
            connector,
            transport: None,
            order,
            settings,
            observer: Arc::new(TracingObserver),
            counters: SessionCounters::default(),
            state: ConsumerState::Idle,
            termination: None,
        })
    }

    /// Replace the default tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn order(&self) -> &PriorityOrder {
        &self.order
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    fn limit_reached(&self) -> bool {
        self.settings
            .pull_limit
            .is_some_and(|limit| self.counters.received_count >= limit)
    }

    /// Batch size for the next pull, or `None` when the limit is reached
    fn next_request_size(&self) -> Option<u32> {
        match self.settings.pull_limit {
            None => Some(self.settings.batch_size),
            Some(limit) => {
                let remaining = limit.saturating_sub(self.counters.received_count);
                if remaining == 0 {
                    None
                } else {
                    let capped = remaining.min(u64::from(self.settings.batch_size));
                    Some(u32::try_from(capped).unwrap_or(self.settings.batch_size))
                }
            }
        }
    }

    /// Run cycles until the pull limit is reached or shutdown is requested.
    ///
    /// Transport errors never end the loop. The transport is closed once on
    /// exit.
    pub async fn run(&mut self, shutdown: Shutdown) -> ConsumerSummary {
        if let Some(reason) = self.termination {
            return self.summary(reason);
        }

        info!(
            queues = ?self
                .order
                .queues()
                .iter()
                .map(|q| q.name.as_str())
                .collect::<Vec<_>>(),
            batch_size = self.settings.batch_size,
            pull_limit = ?self.settings.pull_limit,
            "Starting priority consumer"
        );

        loop {
            if self.limit_reached() {
                return self.terminate(TerminationReason::PullLimitReached).await;
            }
            if shutdown.is_triggered() {
                return self.terminate(TerminationReason::Shutdown).await;
            }

            // An interrupted cycle may leave part of a batch unacknowledged
            let outcome = tokio::select! {
                biased;
                _ = shutdown.triggered() => None,
                outcome = self.run_cycle() => Some(outcome),
            };
            let Some(outcome) = outcome else {
                return self.terminate(TerminationReason::Shutdown).await;
            };

            let (reason, consecutive, retry_hint) = match outcome {
                Ok(CycleOutcome::Processed { .. }) | Ok(CycleOutcome::LimitReached) => {
                    if !self.limit_reached() {
                        self.state = ConsumerState::Idle;
                    }
                    continue;
                }
                Ok(CycleOutcome::Empty) => {
                    (PauseReason::Idle, self.counters.consecutive_empty_polls, None)
                }
                Err(e) => {
                    error!(
                        operation = e.operation(),
                        subscription = e.subscription().unwrap_or("-"),
                        error = %e,
                        transient = e.transport_error().is_transient(),
                        "Poll cycle failed"
                    );
                    let retry_hint = e
                        .transport_error()
                        .retry_after()
                        .and_then(|hint| hint.to_std().ok());
                    (
                        PauseReason::TransportError,
                        self.counters.consecutive_failures,
                        retry_hint,
                    )
                }
            };

            let pause = self.settings.backoff.pause_with_hint(consecutive, retry_hint);
            debug!(
                reason = %reason,
                consecutive = consecutive,
                pause_ms = pause_millis(pause),
                "Pausing before next cycle"
            );

            self.state = ConsumerState::Waiting;
            let interrupted = tokio::select! {
                biased;
                _ = shutdown.triggered() => true,
                _ = tokio::time::sleep(pause) => false,
            };
            if interrupted {
                return self.terminate(TerminationReason::Shutdown).await;
            }
            self.state = ConsumerState::Idle;
        }
    }

    /// Run a single poll cycle: pull by priority, process, acknowledge.
    ///
    /// Does not pause; the caller decides what to do with the outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ConsumerError> {
        if self.limit_reached() {
            return Ok(CycleOutcome::LimitReached);
        }

        self.counters.cycles += 1;
        let result = self.poll_by_priority().await;

        match &result {
            Ok(CycleOutcome::Empty) => {
                self.counters.consecutive_empty_polls += 1;
                self.counters.consecutive_failures = 0;
                self.state = ConsumerState::Waiting;
            }
            Ok(_) => {
                self.counters.consecutive_failures = 0;
            }
            Err(_) => {
                self.counters.consecutive_failures += 1;
                self.state = ConsumerState::Waiting;
            }
        }

        result
    }

    async fn poll_by_priority(&mut self) -> Result<CycleOutcome, ConsumerError> {
        let transport = self.connect().await?;
        let order = self.order.clone();

        for queue in order.queues() {
            let Some(max_messages) = self.next_request_size() else {
                return Ok(CycleOutcome::LimitReached);
            };

            self.state = ConsumerState::Polling { rank: queue.rank };
            let request = PullRequest {
                max_messages,
                return_immediately: true,
            };

            let messages = match transport.pull(&queue.name, request).await {
                Ok(messages) => messages,
                Err(source) => {
                    self.counters.pull_failures += 1;
                    return Err(ConsumerError::PullFailed {
                        subscription: queue.name.to_string(),
                        source,
                    });
                }
            };

            debug!(
                subscription = %queue.name,
                rank = queue.rank,
                requested = max_messages,
                received = messages.len(),
                "Pull completed"
            );

            if messages.is_empty() {
                continue;
            }

            let batch = PollBatch::received_now(
                queue.clone(),
                self.enforce_request_size(queue, messages, max_messages),
            );
            return self.handle_batch(transport.as_ref(), batch).await;
        }

        Ok(CycleOutcome::Empty)
    }

    /// Drop deliveries beyond what was requested; they are left to redeliver
    fn enforce_request_size(
        &self,
        queue: &QueueIdentity,
        mut messages: Vec<ReceivedMessage>,
        max_messages: u32,
    ) -> Vec<ReceivedMessage> {
        let max = max_messages as usize;
        if messages.len() > max {
            warn!(
                subscription = %queue.name,
                requested = max,
                received = messages.len(),
                "Transport returned more messages than requested; excess left unacknowledged"
            );
            messages.truncate(max);
        }
        messages
    }

    async fn handle_batch(
        &mut self,
        transport: &dyn QueueTransport,
        batch: PollBatch,
    ) -> Result<CycleOutcome, ConsumerError> {
        self.counters.consecutive_empty_polls = 0;

        self.state = ConsumerState::Processing;
        let mut handles: Vec<AckHandle> = Vec::with_capacity(batch.len());
        for message in &batch.messages {
            let report = self
                .settings
                .analyzer
                .analyze(&message.payload, batch.received_at);
            if report.is_high_latency() {
                self.counters.high_latency_count += 1;
            }

            let record = MessageRecord::new(
                batch.queue.clone(),
                message.ack_handle.clone(),
                message.message_id.clone(),
                report,
                batch.received_at,
            );
            self.observer.on_message(&record);
            handles.push(message.ack_handle.clone());
        }

        self.state = ConsumerState::Acknowledging;
        match ack::dispatch(transport, &batch.queue, &handles).await {
            Ok(AckOutcome::Acknowledged(count)) => {
                self.counters.acknowledged_count += count as u64;
            }
            Ok(AckOutcome::Skipped) => {}
            // The batch will be redelivered, so it does not count toward the limit
            Err(e) => {
                self.counters.ack_failures += 1;
                return Err(e);
            }
        }

        self.counters.received_count += batch.len() as u64;
        self.state = ConsumerState::CheckLimit;
        info!(
            subscription = %batch.queue.name,
            queue = %batch.queue.label(),
            count = batch.len(),
            received_total = self.counters.received_count,
            "Processed batch"
        );

        Ok(CycleOutcome::Processed {
            queue: batch.queue,
            count: handles.len(),
        })
    }

    async fn connect(&mut self) -> Result<Arc<dyn QueueTransport>, ConsumerError> {
        if let Some(transport) = &self.transport {
            return Ok(Arc::clone(transport));
        }

        match self.connector.connect().await {
            Ok(transport) => {
                self.transport = Some(Arc::clone(&transport));
                Ok(transport)
            }
            Err(source) => {
                self.counters.pull_failures += 1;
                Err(ConsumerError::ConnectFailed { source })
            }
        }
    }

    async fn terminate(&mut self, reason: TerminationReason) -> ConsumerSummary {
        self.state = ConsumerState::Terminal;
        self.termination = Some(reason);

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Failed to close transport");
            }
        }

        let summary = self.summary(reason);
        info!(
            reason = %reason,
            received = summary.counters.received_count,
            acknowledged = summary.counters.acknowledged_count,
            cycles = summary.counters.cycles,
            pull_failures = summary.counters.pull_failures,
            ack_failures = summary.counters.ack_failures,
            high_latency = summary.counters.high_latency_count,
            "Priority consumer stopped"
        );
        summary
    }

    fn summary(&self, reason: TerminationReason) -> ConsumerSummary {
        ConsumerSummary {
            counters: self.counters.clone(),
            reason,
        }
    }
}
