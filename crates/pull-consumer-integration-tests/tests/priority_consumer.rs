//! Integration tests for priority draining over the in-memory transport
//!
//! These tests verify:
//! - Messages published by the harness producer are consumed and decoded
//! - Latency flagging across the producer and consumer boundary
//! - Redelivery after a failed acknowledgment
//! - Shutdown requested from another task

mod common;

use common::{aged_payload, Harness};
use pull_consumer_core::{
    shutdown, ConsumerError, CycleOutcome, DecodedPayload, PayloadMode, PublishRequest,
    Shutdown, TerminationReason, TestProducer,
};
use pull_runtime::{TopicName, TransportError};
use std::time::Duration;

/// Verify that structured primary messages are consumed before plain overflow ones.
#[tokio::test]
async fn test_produced_messages_are_drained_in_priority_order() {
    let harness = Harness::new();
    let producer = TestProducer::new(harness.transport.clone());

    producer
        .publish(
            &TopicName::new(common::PRIMARY).unwrap(),
            &PublishRequest {
                count: 2,
                content: Some("Priority".to_string()),
                mode: PayloadMode::Structured,
            },
        )
        .await
        .unwrap();
    producer
        .publish(
            &TopicName::new(common::SECONDARY).unwrap(),
            &PublishRequest {
                count: 2,
                content: None,
                mode: PayloadMode::Plain,
            },
        )
        .await
        .unwrap();

    let mut consumer = harness.consumer(harness.settings(10, Some(3)));
    let summary = consumer.run(Shutdown::never()).await;

    assert_eq!(summary.reason, TerminationReason::PullLimitReached);
    assert_eq!(summary.counters.received_count, 3);
    assert_eq!(summary.counters.cycles, 2);

    let records = harness.observer.records();
    let contents: Vec<&str> = records.iter().map(|r| r.content()).collect();
    assert_eq!(contents, vec!["Priority 1/2", "Priority 2/2", "Hello, world!"]);

    assert!(records[..2].iter().all(|r| r.decoded.is_structured()));
    assert!(records[..2].iter().all(|r| r.queue.rank == 0));
    assert!(matches!(records[2].decoded, DecodedPayload::Opaque { .. }));
    assert!(records[2].traversal.is_none());

    // One overflow message stays behind for the next run
    assert_eq!(harness.transport.pending_count(&harness.secondary()), 1);
    assert!(harness.transport.is_closed());
}

/// Verify that old messages are flagged while fresh ones are not.
#[tokio::test]
async fn test_stale_messages_are_flagged_high_latency() {
    let harness = Harness::new();
    harness.transport.enqueue(
        &harness.primary(),
        aged_payload("fresh", Duration::from_millis(100)),
    );
    harness.transport.enqueue(
        &harness.secondary(),
        aged_payload("stale", Duration::from_secs(30)),
    );

    let mut consumer = harness.consumer(harness.settings(10, Some(2)));
    let summary = consumer.run(Shutdown::never()).await;

    assert_eq!(summary.counters.high_latency_count, 1);
    let records = harness.observer.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].is_high_latency());
    assert!(records[1].is_high_latency());
    assert!(records[1].to_string().ends_with("HIGH LATENCY"));
    assert!(records[1].traversal.is_some_and(|t| t.millis >= 30_000));
}

/// Verify that a failed acknowledgment leaves messages for redelivery.
#[tokio::test]
async fn test_failed_acknowledgment_is_redelivered_after_lease_expiry() {
    let harness = Harness::new();
    harness.transport.enqueue(&harness.primary(), "first");
    harness.transport.enqueue(&harness.primary(), "second");
    harness.transport.fail_next_acknowledge(
        &harness.primary(),
        TransportError::ProviderError {
            provider: "memory".to_string(),
            code: "UNAVAILABLE".to_string(),
            message: "ack rejected".to_string(),
        },
    );

    let mut consumer = harness.consumer(harness.settings(10, None));

    let first = consumer.run_cycle().await;
    assert!(matches!(first, Err(ConsumerError::AckFailed { count: 2, .. })));
    assert_eq!(harness.transport.in_flight_count(), 2);
    assert_eq!(consumer.counters().ack_failures, 1);

    // Nothing is visible until the lease runs out
    let hidden = consumer.run_cycle().await.unwrap();
    assert_eq!(hidden, CycleOutcome::Empty);

    assert_eq!(harness.transport.expire_leases(), 2);
    let redelivered = consumer.run_cycle().await.unwrap();
    assert!(matches!(redelivered, CycleOutcome::Processed { count: 2, .. }));

    let acks = harness.transport.acknowledge_calls();
    assert_eq!(acks.len(), 2);
    assert_ne!(acks[0].1, acks[1].1);
    assert_eq!(harness.transport.in_flight_count(), 0);
    assert_eq!(consumer.counters().received_count, 2);

    let contents: Vec<String> = harness
        .observer
        .records()
        .iter()
        .map(|r| r.content().to_string())
        .collect();
    assert_eq!(contents, vec!["first", "second", "first", "second"]);
}

/// Verify that a shutdown requested elsewhere stops an idle consumer.
#[tokio::test(start_paused = true)]
async fn test_shutdown_from_another_task_stops_idle_consumer() {
    let harness = Harness::new();
    let mut consumer = harness.consumer(harness.settings(10, None));
    let (trigger, shutdown) = shutdown::channel();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        trigger.trigger();
    });

    let summary = consumer.run(shutdown).await;
    stopper.await.unwrap();

    assert_eq!(summary.reason, TerminationReason::Shutdown);
    assert_eq!(summary.counters.received_count, 0);
    assert_eq!(summary.counters.cycles, 3);
    assert!(summary.counters.consecutive_empty_polls >= 3);
    assert_eq!(harness.transport.close_count(), 1);
}
