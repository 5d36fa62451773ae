//! Provider types and configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Public Google Cloud Pub/Sub REST endpoint
pub const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Enumeration of supported transport providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "pubsub")]
    PubSub,
    #[serde(rename = "memory")]
    InMemory,
}

impl ProviderType {
    /// Get the largest batch a single pull may request
    pub fn max_messages_per_pull(&self) -> u32 {
        match self {
            Self::PubSub => 1000,
            Self::InMemory => 10_000,
        }
    }

    /// Get the provider label used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PubSub => "pubsub",
            Self::InMemory => "memory",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum TransportConfig {
    #[serde(rename = "pubsub")]
    PubSub(PubSubConfig),
    #[serde(rename = "memory")]
    InMemory,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::PubSub(PubSubConfig::default())
    }
}

impl TransportConfig {
    /// Get provider type for this configuration
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::PubSub(_) => ProviderType::PubSub,
            Self::InMemory => ProviderType::InMemory,
        }
    }
}

/// Google Cloud Pub/Sub REST configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Project that owns the topics and subscriptions
    pub project_id: String,

    /// `host:port` of a local Pub/Sub emulator; takes precedence over `endpoint`
    pub emulator_host: Option<String>,

    /// REST endpoint of the Pub/Sub API
    pub endpoint: String,

    /// OAuth2 bearer token sent with every request (not needed for the emulator)
    pub access_token: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: "test-project".to_string(),
            emulator_host: None,
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            access_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl PubSubConfig {
    /// Resolve the base URL requests are sent to
    pub fn base_url(&self) -> Result<Url, ConfigurationError> {
        let raw = match self.emulator_host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.to_string()
            }
            Some(host) => format!("http://{}", host),
            None => self.endpoint.clone(),
        };

        // A trailing slash keeps `Url::join` from dropping the last path segment
        let normalized = if raw.ends_with('/') {
            raw
        } else {
            format!("{}/", raw)
        };

        Url::parse(&normalized).map_err(|e| ConfigurationError::Invalid {
            message: format!("invalid Pub/Sub endpoint '{}': {}", normalized, e),
        })
    }

    /// Check if requests target an emulator
    pub fn uses_emulator(&self) -> bool {
        self.emulator_host.as_deref().is_some_and(|h| !h.is_empty())
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
