//! Tests for consumer error types.

use super::*;

#[test]
fn test_consumer_error_reports_operation_and_subscription() {
    let error = ConsumerError::PullFailed {
        subscription: "test-sub".to_string(),
        source: TransportError::ConnectionFailed {
            message: "refused".to_string(),
        },
    };

    assert_eq!(error.operation(), "pull");
    assert_eq!(error.subscription(), Some("test-sub"));
    assert!(error.transport_error().is_transient());
    assert_eq!(
        error.to_string(),
        "Pull from subscription 'test-sub' failed: Connection failed: refused"
    );
}

#[test]
fn test_connect_failure_has_no_subscription() {
    let error = ConsumerError::ConnectFailed {
        source: TransportError::Closed,
    };

    assert_eq!(error.operation(), "connect");
    assert_eq!(error.subscription(), None);
}

#[test]
fn test_ack_failure_message_includes_count() {
    let error = ConsumerError::AckFailed {
        subscription: "test-overflow-sub".to_string(),
        count: 3,
        source: TransportError::Closed,
    };

    assert_eq!(error.operation(), "acknowledge");
    assert!(error
        .to_string()
        .starts_with("Acknowledgment of 3 message(s) on subscription 'test-overflow-sub' failed"));
}

#[test]
fn test_config_error_invalid_helper() {
    let error = ConfigError::invalid("max_messages_per_pull", "must be at least 1");

    assert_eq!(
        error.to_string(),
        "Invalid configuration value for 'max_messages_per_pull': must be at least 1"
    );
}
