//! Error types for the priority consumer, its configuration and the producer.

use pull_runtime::{TransportError, ValidationError};
use thiserror::Error;

/// Recoverable failures of a single poll cycle.
///
/// None of these stop the consumer; they abort the current cycle and trigger
/// a backoff pause before the next one.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to connect to transport: {source}")]
    ConnectFailed {
        #[source]
        source: TransportError,
    },

    #[error("Pull from subscription '{subscription}' failed: {source}")]
    PullFailed {
        subscription: String,
        #[source]
        source: TransportError,
    },

    #[error("Acknowledgment of {count} message(s) on subscription '{subscription}' failed: {source}")]
    AckFailed {
        subscription: String,
        count: usize,
        #[source]
        source: TransportError,
    },
}

impl ConsumerError {
    /// Get the transport operation that failed
    pub fn operation(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect",
            Self::PullFailed { .. } => "pull",
            Self::AckFailed { .. } => "acknowledge",
        }
    }

    /// Get the subscription involved, if the failure was subscription specific
    pub fn subscription(&self) -> Option<&str> {
        match self {
            Self::ConnectFailed { .. } => None,
            Self::PullFailed { subscription, .. } | Self::AckFailed { subscription, .. } => {
                Some(subscription)
            }
        }
    }

    /// Get the underlying transport error
    pub fn transport_error(&self) -> &TransportError {
        match self {
            Self::ConnectFailed { source }
            | Self::PullFailed { source, .. }
            | Self::AckFailed { source, .. } => source,
        }
    }
}

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Invalid resource name: {0}")]
    InvalidName(#[from] ValidationError),

    #[error("Failed to render configuration: {message}")]
    Render { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised while publishing test messages
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Message count must be at least 1")]
    EmptyBatch,

    #[error("Failed to encode test message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Publish failed: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
