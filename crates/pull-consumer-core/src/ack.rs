//! Acknowledgment dispatch for processed batches.

use crate::error::ConsumerError;
use crate::queue::QueueIdentity;
use pull_runtime::{AckHandle, QueueTransport};
use tracing::debug;

#[cfg(test)]
#[path = "ack_tests.rs"]
mod tests;

/// Result of dispatching acknowledgments for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Nothing to acknowledge; the transport was not called
    Skipped,
    /// This many handles were acknowledged in one call
    Acknowledged(usize),
}

/// Acknowledge `handles` on the queue they were pulled from.
///
/// An empty handle set makes no transport call. Failures are returned to the
/// caller and never retried here; the transport redelivers after lease expiry.
pub async fn dispatch(
    transport: &dyn QueueTransport,
    queue: &QueueIdentity,
    handles: &[AckHandle],
) -> Result<AckOutcome, ConsumerError> {
    if handles.is_empty() {
        return Ok(AckOutcome::Skipped);
    }

    transport
        .acknowledge(&queue.name, handles)
        .await
        .map_err(|source| ConsumerError::AckFailed {
            subscription: queue.name.to_string(),
            count: handles.len(),
            source,
        })?;

    debug!(
        subscription = %queue.name,
        count = handles.len(),
        "Acknowledged messages"
    );

    Ok(AckOutcome::Acknowledged(handles.len()))
}
