//! Tests for acknowledgment dispatch.

use super::*;
use pull_runtime::{InMemoryTransport, PullRequest, SubscriptionName, TransportError};

fn primary() -> QueueIdentity {
    QueueIdentity::primary(SubscriptionName::new("test-sub").unwrap())
}

#[tokio::test]
async fn test_empty_handle_set_makes_no_call() {
    let transport = InMemoryTransport::new();

    let outcome = dispatch(&transport, &primary(), &[]).await.unwrap();

    assert_eq!(outcome, AckOutcome::Skipped);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_handles_are_acknowledged_in_one_call() {
    let transport = InMemoryTransport::new();
    let queue = primary();
    transport.enqueue(&queue.name, "a");
    transport.enqueue(&queue.name, "b");
    let handles: Vec<AckHandle> = transport
        .pull(&queue.name, PullRequest::immediate(2).unwrap())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.ack_handle)
        .collect();

    let outcome = dispatch(&transport, &queue, &handles).await.unwrap();

    assert_eq!(outcome, AckOutcome::Acknowledged(2));
    assert_eq!(transport.acknowledge_calls(), vec![(queue.name, handles)]);
    assert_eq!(transport.in_flight_count(), 0);
}

#[tokio::test]
async fn test_failure_is_reported_with_subscription() {
    let transport = InMemoryTransport::new();
    let queue = primary();
    transport.fail_next_acknowledge(&queue.name, TransportError::Closed);

    let error = dispatch(&transport, &queue, &[AckHandle::new("test-sub:1")])
        .await
        .unwrap_err();

    match error {
        ConsumerError::AckFailed {
            subscription,
            count,
            source: TransportError::Closed,
        } => {
            assert_eq!(subscription, "test-sub");
            assert_eq!(count, 1);
        }
        other => panic!("Expected AckFailed, got {:?}", other),
    }
    assert_eq!(transport.acknowledge_calls().len(), 1);
}
