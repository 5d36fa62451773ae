//! Tests for the priority consumer loop.

use super::*;
use crate::record::MemoryObserver;
use crate::shutdown;
use async_trait::async_trait;
use pull_runtime::{
    InMemoryTransport, ProviderType, SharedTransport, SubscriptionName, TransportError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn name(value: &str) -> SubscriptionName {
    SubscriptionName::new(value).unwrap()
}

fn primary() -> SubscriptionName {
    name("test-sub")
}

fn secondary() -> SubscriptionName {
    name("test-overflow-sub")
}

struct Harness {
    transport: Arc<InMemoryTransport>,
    observer: Arc<MemoryObserver>,
    consumer: PriorityConsumer,
}

fn harness(pull_limit: Option<u64>, batch_size: u32) -> Harness {
    let transport = Arc::new(InMemoryTransport::new());
    let observer = Arc::new(MemoryObserver::new());
    let consumer = PriorityConsumer::new(
        Arc::new(SharedTransport::new(transport.clone())),
        PriorityOrder::dual(primary(), secondary()).unwrap(),
        ConsumerSettings {
            batch_size,
            pull_limit,
            ..Default::default()
        },
    )
    .unwrap()
    .with_observer(observer.clone());

    Harness {
        transport,
        observer,
        consumer,
    }
}

/// Connector that fails a fixed number of times before connecting
struct FlakyConnector {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    transport: Arc<InMemoryTransport>,
}

#[async_trait]
impl TransportConnector for FlakyConnector {
    async fn connect(&self) -> Result<Arc<dyn QueueTransport>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed {
                message: "emulator not ready".to_string(),
            });
        }
        Ok(self.transport.clone())
    }
}

/// Transport that ignores the requested batch size and fails on close
struct UnrulyTransport {
    inner: InMemoryTransport,
}

#[async_trait]
impl QueueTransport for UnrulyTransport {
    async fn pull(
        &self,
        subscription: &SubscriptionName,
        _request: PullRequest,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        self.inner
            .pull(subscription, PullRequest::immediate(100).unwrap())
            .await
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        handles: &[AckHandle],
    ) -> Result<(), TransportError> {
        self.inner.acknowledge(subscription, handles).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await?;
        Err(TransportError::ConnectionFailed {
            message: "socket already gone".to_string(),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

mod priority {
    use super::*;

    /// Verify the documented end-to-end sequence with a pull limit.
    #[tokio::test(start_paused = true)]
    async fn test_limit_spans_primary_then_secondary() {
        let mut h = harness(Some(4), 10);
        for i in 0..3 {
            h.transport.enqueue(&primary(), format!("normal-{}", i));
        }
        for i in 0..2 {
            h.transport.enqueue(&secondary(), format!("overflow-{}", i));
        }

        let summary = h.consumer.run(Shutdown::never()).await;

        assert_eq!(summary.reason, TerminationReason::PullLimitReached);
        assert_eq!(summary.counters.received_count, 4);
        assert_eq!(summary.counters.acknowledged_count, 4);
        assert_eq!(summary.counters.cycles, 2);
        assert_eq!(
            h.transport.pull_calls(),
            vec![(primary(), 4), (primary(), 1), (secondary(), 1)]
        );

        let acks = h.transport.acknowledge_calls();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].0, primary());
        assert_eq!(acks[0].1.len(), 3);
        assert_eq!(acks[1].0, secondary());
        assert_eq!(acks[1].1.len(), 1);

        assert_eq!(h.transport.pending_count(&secondary()), 1);
        assert_eq!(h.transport.in_flight_count(), 0);
        assert_eq!(h.transport.close_count(), 1);
        assert_eq!(h.consumer.state(), ConsumerState::Terminal);
    }

    /// Verify the secondary queue is not touched while the primary has messages.
    #[tokio::test]
    async fn test_secondary_not_pulled_when_primary_has_messages() {
        let mut h = harness(None, 2);
        for i in 0..3 {
            h.transport.enqueue(&primary(), format!("normal-{}", i));
        }
        h.transport.enqueue(&secondary(), "overflow");

        let first = h.consumer.run_cycle().await.unwrap();
        let second = h.consumer.run_cycle().await.unwrap();

        assert_eq!(
            first,
            CycleOutcome::Processed {
                queue: QueueIdentity::primary(primary()),
                count: 2
            }
        );
        assert_eq!(
            second,
            CycleOutcome::Processed {
                queue: QueueIdentity::primary(primary()),
                count: 1
            }
        );
        assert_eq!(h.transport.pull_calls(), vec![(primary(), 2), (primary(), 2)]);
        assert_eq!(h.transport.pending_count(&secondary()), 1);
    }

    /// Verify every tier is consulted in order when the upper ones are empty.
    #[tokio::test]
    async fn test_three_tiers_fall_through_in_order() {
        let transport = Arc::new(InMemoryTransport::new());
        let order =
            PriorityOrder::new(vec![name("tier-zero"), name("tier-one"), name("tier-two")])
                .unwrap();
        let mut consumer = PriorityConsumer::new(
            Arc::new(SharedTransport::new(transport.clone())),
            order,
            ConsumerSettings::default(),
        )
        .unwrap();
        transport.enqueue(&name("tier-two"), "bottom");

        let outcome = consumer.run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Processed {
                queue: QueueIdentity::new(name("tier-two"), 2),
                count: 1
            }
        );
        let pulled: Vec<String> = transport
            .pull_calls()
            .into_iter()
            .map(|(s, _)| s.to_string())
            .collect();
        assert_eq!(pulled, vec!["tier-zero", "tier-one", "tier-two"]);
    }

    /// Verify records are emitted in delivery order with their source queue.
    #[tokio::test]
    async fn test_records_follow_delivery_order() {
        let mut h = harness(None, 10);
        h.transport.enqueue(
            &primary(),
            r#"{"content":"old","timestamp":"2020-01-01T00:00:00Z"}"#,
        );
        h.transport.enqueue(&primary(), "Hello, world!");

        h.consumer.run_cycle().await.unwrap();

        let records = h.observer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content(), "old");
        assert!(records[0].is_high_latency());
        assert_eq!(records[1].content(), "Hello, world!");
        assert!(records[1].traversal.is_none());
        assert!(records.iter().all(|r| r.queue.rank == 0));
        assert_eq!(h.consumer.counters().high_latency_count, 1);
    }
}

mod acknowledgment {
    use super::*;

    /// Verify exactly the processed handles are acknowledged on the source queue.
    #[tokio::test]
    async fn test_batch_handles_acknowledged_to_source_queue() {
        let mut h = harness(None, 10);
        h.transport.enqueue(&secondary(), "a");
        h.transport.enqueue(&secondary(), "b");

        h.consumer.run_cycle().await.unwrap();

        let handles: Vec<AckHandle> = h
            .observer
            .records()
            .into_iter()
            .map(|r| r.ack_handle)
            .collect();
        assert_eq!(h.transport.acknowledge_calls(), vec![(secondary(), handles)]);
    }

    /// Verify an all-empty cycle makes no acknowledgment call.
    #[tokio::test]
    async fn test_empty_cycle_does_not_acknowledge() {
        let mut h = harness(None, 10);

        let outcome = h.consumer.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Empty);
        assert!(h.transport.acknowledge_calls().is_empty());
        assert_eq!(h.consumer.state(), ConsumerState::Waiting);
        assert_eq!(h.consumer.counters().consecutive_empty_polls, 1);
    }

    /// Verify a failed acknowledgment is reported and not retried.
    #[tokio::test]
    async fn test_ack_failure_is_not_retried() {
        let mut h = harness(None, 10);
        h.transport.enqueue(&primary(), "a");
        h.transport.fail_next_acknowledge(
            &primary(),
            TransportError::Timeout {
                duration: chrono::Duration::seconds(10),
            },
        );

        let error = h.consumer.run_cycle().await.unwrap_err();
        assert_eq!(error.operation(), "acknowledge");

        let next = h.consumer.run_cycle().await.unwrap();
        assert_eq!(next, CycleOutcome::Empty);

        let counters = h.consumer.counters();
        assert_eq!(counters.received_count, 0);
        assert_eq!(counters.acknowledged_count, 0);
        assert_eq!(counters.ack_failures, 1);
        assert_eq!(h.transport.acknowledge_calls().len(), 1);
        assert_eq!(h.transport.in_flight_count(), 1);
    }

    /// Verify an unacknowledged batch does not use up the pull limit.
    #[tokio::test(start_paused = true)]
    async fn test_failed_ack_does_not_count_toward_limit() {
        let mut h = harness(Some(2), 10);
        h.transport.enqueue(&primary(), "a");
        h.transport.enqueue(&primary(), "b");
        h.transport.fail_next_acknowledge(
            &primary(),
            TransportError::Timeout {
                duration: chrono::Duration::seconds(10),
            },
        );

        // Leases run out during the pause that follows the failed ack
        let transport = h.transport.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            transport.expire_leases()
        });

        let summary = h.consumer.run(Shutdown::never()).await;

        assert_eq!(expiry.await.unwrap(), 2);
        assert_eq!(summary.reason, TerminationReason::PullLimitReached);
        assert_eq!(summary.counters.received_count, 2);
        assert_eq!(summary.counters.acknowledged_count, 2);
        assert_eq!(summary.counters.ack_failures, 1);
        assert_eq!(summary.counters.cycles, 2);
        assert_eq!(h.transport.in_flight_count(), 0);
        assert_eq!(h.observer.len(), 4);
    }

    /// Verify deliveries beyond the requested size are left unacknowledged.
    #[tokio::test]
    async fn test_excess_deliveries_are_not_processed() {
        let transport = Arc::new(UnrulyTransport {
            inner: InMemoryTransport::new(),
        });
        for i in 0..5 {
            transport.inner.enqueue(&primary(), format!("m-{}", i));
        }
        let observer = Arc::new(MemoryObserver::new());
        let mut consumer = PriorityConsumer::new(
            Arc::new(SharedTransport::new(transport.clone())),
            PriorityOrder::dual(primary(), secondary()).unwrap(),
            ConsumerSettings {
                batch_size: 10,
                pull_limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap()
        .with_observer(observer.clone());

        let summary = consumer.run(Shutdown::never()).await;

        assert_eq!(summary.counters.received_count, 2);
        assert_eq!(observer.len(), 2);
        let acks = transport.inner.acknowledge_calls();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.len(), 2);
        assert_eq!(transport.inner.in_flight_count(), 3);
    }
}

mod failures {
    use super::*;

    /// Verify a pull error aborts the cycle without falling through.
    #[tokio::test]
    async fn test_pull_error_aborts_cycle() {
        let mut h = harness(None, 10);
        h.transport.enqueue(&secondary(), "waiting");
        h.transport.fail_next_pull(
            &primary(),
            TransportError::ConnectionFailed {
                message: "emulator restarting".to_string(),
            },
        );

        let error = h.consumer.run_cycle().await.unwrap_err();

        assert!(matches!(error, ConsumerError::PullFailed { .. }));
        assert_eq!(error.subscription(), Some("test-sub"));
        assert_eq!(h.transport.pull_calls(), vec![(primary(), 10)]);
        assert_eq!(h.consumer.state(), ConsumerState::Waiting);
        assert_eq!(h.consumer.counters().pull_failures, 1);
        assert_eq!(h.consumer.counters().consecutive_failures, 1);
    }

    /// Verify the loop pauses after an error and then polls the primary again.
    #[tokio::test(start_paused = true)]
    async fn test_pull_error_backs_off_then_retries_primary() {
        let mut h = harness(Some(1), 10);
        h.transport.enqueue(&primary(), "a");
        h.transport.fail_next_pull(
            &primary(),
            TransportError::ConnectionFailed {
                message: "emulator restarting".to_string(),
            },
        );

        let started = tokio::time::Instant::now();
        let summary = h.consumer.run(Shutdown::never()).await;

        assert_eq!(summary.reason, TerminationReason::PullLimitReached);
        assert_eq!(summary.counters.pull_failures, 1);
        assert_eq!(summary.counters.received_count, 1);
        assert_eq!(summary.counters.consecutive_failures, 0);
        assert_eq!(h.transport.pull_calls(), vec![(primary(), 1), (primary(), 1)]);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    /// Verify a transport's retry hint stretches the pause, while errors without one keep the fixed pause.
    #[tokio::test(start_paused = true)]
    async fn test_retry_hint_extends_pause() {
        let mut hinted = harness(Some(1), 10);
        hinted.transport.enqueue(&primary(), "a");
        hinted.transport.fail_next_pull(
            &primary(),
            TransportError::ConnectionFailed {
                message: "connection refused".to_string(),
            },
        );

        let started = tokio::time::Instant::now();
        hinted.consumer.run(Shutdown::never()).await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        let mut plain = harness(Some(1), 10);
        plain.transport.enqueue(&primary(), "a");
        plain.transport.fail_next_pull(
            &primary(),
            TransportError::ProviderError {
                provider: "memory".to_string(),
                code: "UNAVAILABLE".to_string(),
                message: "try later".to_string(),
            },
        );

        let started = tokio::time::Instant::now();
        plain.consumer.run(Shutdown::never()).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(5));
    }

    /// Verify the transport is connected lazily and connect failures back off.
    #[tokio::test]
    async fn test_connect_failure_is_retried_next_cycle() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.enqueue(&primary(), "a");
        let connector = Arc::new(FlakyConnector {
            failures_left: AtomicU32::new(1),
            attempts: AtomicU32::new(0),
            transport: transport.clone(),
        });
        let mut consumer = PriorityConsumer::new(
            connector.clone(),
            PriorityOrder::dual(primary(), secondary()).unwrap(),
            ConsumerSettings::default(),
        )
        .unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);

        let first = consumer.run_cycle().await.unwrap_err();
        assert!(matches!(first, ConsumerError::ConnectFailed { .. }));

        consumer.run_cycle().await.unwrap();
        consumer.run_cycle().await.unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(consumer.counters().pull_failures, 1);
        assert_eq!(consumer.counters().received_count, 1);
    }

    /// Verify a failing close is logged and the run still completes.
    #[tokio::test]
    async fn test_close_error_is_not_fatal() {
        let transport = Arc::new(UnrulyTransport {
            inner: InMemoryTransport::new(),
        });
        transport.inner.enqueue(&primary(), "a");
        let mut consumer = PriorityConsumer::new(
            Arc::new(SharedTransport::new(transport.clone())),
            PriorityOrder::dual(primary(), secondary()).unwrap(),
            ConsumerSettings {
                pull_limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();

        let summary = consumer.run(Shutdown::never()).await;

        assert_eq!(summary.reason, TerminationReason::PullLimitReached);
        assert_eq!(transport.inner.close_count(), 1);
    }
}

mod lifecycle {
    use super::*;

    /// Verify shutdown interrupts an idle pause promptly.
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_pause() {
        let mut h = harness(None, 10);
        let (trigger, shutdown) = shutdown::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.trigger();
        });

        let started = tokio::time::Instant::now();
        let summary = h.consumer.run(shutdown).await;

        assert_eq!(summary.reason, TerminationReason::Shutdown);
        assert_eq!(summary.counters.cycles, 3);
        assert_eq!(summary.counters.consecutive_empty_polls, 3);
        assert_eq!(h.transport.pull_calls().len(), 6);
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(h.transport.close_count(), 1);
    }

    /// Verify a consumer that never connected does not close anything.
    #[tokio::test]
    async fn test_shutdown_before_first_cycle() {
        let mut h = harness(None, 10);
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let summary = h.consumer.run(shutdown).await;

        assert_eq!(summary.reason, TerminationReason::Shutdown);
        assert_eq!(summary.counters.cycles, 0);
        assert!(h.transport.calls().is_empty());
    }

    /// Verify a terminated consumer stays terminated.
    #[tokio::test]
    async fn test_run_after_termination_is_a_no_op() {
        let mut h = harness(Some(1), 10);
        h.transport.enqueue(&primary(), "a");
        h.transport.enqueue(&primary(), "b");

        let first = h.consumer.run(Shutdown::never()).await;
        let second = h.consumer.run(Shutdown::never()).await;

        assert_eq!(first, second);
        assert_eq!(h.transport.pull_calls().len(), 1);
        assert_eq!(h.transport.close_count(), 1);
    }

    #[test]
    fn test_initial_state_is_idle() {
        let h = harness(None, 10);

        assert_eq!(h.consumer.state(), ConsumerState::Idle);
        assert_eq!(h.consumer.counters(), &SessionCounters::default());
    }
}

mod settings {
    use super::*;

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let settings = ConsumerSettings {
            batch_size: 0,
            ..Default::default()
        };

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "max_messages_per_pull"
        ));
    }

    #[test]
    fn test_zero_pull_limit_is_rejected() {
        let result = PriorityConsumer::new(
            Arc::new(SharedTransport::new(Arc::new(InMemoryTransport::new()))),
            PriorityOrder::dual(primary(), secondary()).unwrap(),
            ConsumerSettings {
                pull_limit: Some(0),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "pull_limit"));
    }
}
