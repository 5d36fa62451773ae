//! Google Cloud Pub/Sub transport using the REST v1 API.
//!
//! Works against both the hosted service and the local Pub/Sub emulator. The
//! emulator is selected by `PubSubConfig::emulator_host` and needs no
//! credentials; the hosted service expects a bearer token.
//!
//! ## Wire format
//!
//! - `POST v1/projects/{project}/subscriptions/{subscription}:pull`
//!   with `{"maxMessages": n, "returnImmediately": true}`
//! - `POST v1/projects/{project}/subscriptions/{subscription}:acknowledge`
//!   with `{"ackIds": [...]}`
//! - `POST v1/projects/{project}/topics/{topic}:publish`
//!   with `{"messages": [{"data": "<base64>", "attributes": {...}}]}`

use crate::client::{QueuePublisher, QueueTransport};
use crate::error::{ConfigurationError, SerializationError, TransportError};
use crate::message::{
    AckHandle, MessageId, OutboundMessage, PullRequest, ReceivedMessage, SubscriptionName,
    Timestamp, TopicName,
};
use crate::provider::{ProviderType, PubSubConfig};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "pubsub_tests.rs"]
mod tests;

const PROVIDER: &str = "pubsub";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    max_messages: u32,
    return_immediately: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    publish_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody<'a> {
    ack_ids: Vec<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct EmptyResponse {}

#[derive(Debug, Serialize)]
struct PublishBody {
    messages: Vec<WireOutboundMessage>,
}

#[derive(Debug, Serialize)]
struct WireOutboundMessage {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Resource a request addresses, used to shape error variants
enum Resource<'a> {
    Subscription(&'a SubscriptionName),
    Topic(&'a TopicName),
}

// ============================================================================
// PubSubTransport
// ============================================================================

/// Pub/Sub REST transport
pub struct PubSubTransport {
    http: reqwest::Client,
    base_url: Url,
    project_id: String,
    access_token: Option<String>,
    request_timeout_seconds: u64,
    closed: AtomicBool,
}

impl PubSubTransport {
    /// Create transport from configuration
    pub fn new(config: PubSubConfig) -> Result<Self, TransportError> {
        if config.project_id.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "project_id".to_string(),
            }
            .into());
        }

        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.request_timeout_seconds,
            ))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        debug!(
            base_url = %base_url,
            project_id = %config.project_id,
            emulator = config.uses_emulator(),
            "Created Pub/Sub transport"
        );

        // The emulator does not authenticate
        let access_token = if config.uses_emulator() {
            None
        } else {
            config.access_token
        };

        Ok(Self {
            http,
            base_url,
            project_id: config.project_id,
            access_token,
            request_timeout_seconds: config.request_timeout_seconds,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn resource_url(&self, resource: &Resource<'_>, action: &str) -> Result<Url, TransportError> {
        let path = match resource {
            Resource::Subscription(name) => format!(
                "v1/projects/{}/subscriptions/{}:{}",
                self.project_id, name, action
            ),
            Resource::Topic(name) => {
                format!("v1/projects/{}/topics/{}:{}", self.project_id, name, action)
            }
        };

        self.base_url.join(&path).map_err(|e| {
            TransportError::from(ConfigurationError::Invalid {
                message: format!("cannot build request URL '{}': {}", path, e),
            })
        })
    }

    async fn post<B, R>(
        &self,
        resource: Resource<'_>,
        action: &str,
        body: &B,
    ) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        self.ensure_open()?;
        let url = self.resource_url(&resource, action)?;

        let mut request = self.http.post(url).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        let status = response.status();
        let payload = response
            .bytes()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !status.is_success() {
            return Err(map_status(status, &payload, &resource, action));
        }

        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(R::default());
        }

        serde_json::from_slice(&payload)
            .map_err(|e| TransportError::from(SerializationError::JsonError(e)))
    }

    fn map_request_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                duration: chrono::Duration::seconds(self.request_timeout_seconds as i64),
            }
        } else {
            TransportError::ConnectionFailed {
                message: error.to_string(),
            }
        }
    }
}

/// Translate a non-success HTTP status into a transport error
fn map_status(
    status: StatusCode,
    payload: &[u8],
    resource: &Resource<'_>,
    action: &str,
) -> TransportError {
    let detail = serde_json::from_slice::<ErrorEnvelope>(payload)
        .map(|envelope| envelope.error)
        .ok();
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| String::from_utf8_lossy(payload).trim().to_string());

    match status {
        StatusCode::NOT_FOUND => match resource {
            Resource::Subscription(name) => TransportError::SubscriptionNotFound {
                subscription: name.to_string(),
            },
            Resource::Topic(name) => TransportError::TopicNotFound {
                topic: name.to_string(),
            },
        },
        StatusCode::UNAUTHORIZED => TransportError::AuthenticationFailed { message },
        StatusCode::FORBIDDEN => TransportError::PermissionDenied {
            operation: action.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportError::Timeout {
            duration: chrono::Duration::zero(),
        },
        _ => TransportError::ProviderError {
            provider: PROVIDER.to_string(),
            code: detail
                .and_then(|d| d.status)
                .unwrap_or_else(|| status.as_u16().to_string()),
            message,
        },
    }
}

/// Convert a wire delivery into a received message
fn decode_received(wire: WireReceivedMessage) -> Result<ReceivedMessage, TransportError> {
    let payload = match wire.message.data {
        Some(encoded) => general_purpose::STANDARD.decode(encoded).map_err(|e| {
            SerializationError::InvalidBase64 {
                message: e.to_string(),
            }
        })?,
        None => Vec::new(),
    };

    let mut message = ReceivedMessage::new(AckHandle::new(wire.ack_id), Bytes::from(payload));
    message.attributes = wire.message.attributes;
    message.delivery_attempt = wire.delivery_attempt;
    message.message_id = wire
        .message
        .message_id
        .and_then(|id| id.parse::<MessageId>().ok());
    message.publish_time = wire.message.publish_time.and_then(|raw| {
        raw.parse::<Timestamp>()
            .map_err(|e| debug!(publish_time = %raw, error = %e, "Ignoring unparseable publish time"))
            .ok()
    });

    Ok(message)
}

#[async_trait]
impl QueueTransport for PubSubTransport {
    async fn pull(
        &self,
        subscription: &SubscriptionName,
        request: PullRequest,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let max_size = ProviderType::PubSub.max_messages_per_pull();
        if request.max_messages > max_size {
            return Err(TransportError::BatchTooLarge {
                size: request.max_messages,
                max_size,
            });
        }

        let body = PullBody {
            max_messages: request.max_messages,
            return_immediately: request.return_immediately,
        };
        let response: PullResponse = self
            .post(Resource::Subscription(subscription), "pull", &body)
            .await?;

        response
            .received_messages
            .into_iter()
            .map(decode_received)
            .collect()
    }

    async fn acknowledge(
        &self,
        subscription: &SubscriptionName,
        handles: &[AckHandle],
    ) -> Result<(), TransportError> {
        if handles.is_empty() {
            return Ok(());
        }

        let body = AcknowledgeBody {
            ack_ids: handles.iter().map(AckHandle::as_str).collect(),
        };
        let _: EmptyResponse = self
            .post(Resource::Subscription(subscription), "acknowledge", &body)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Pub/Sub transport already closed");
        }
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::PubSub
    }
}

#[async_trait]
impl QueuePublisher for PubSubTransport {
    async fn publish(
        &self,
        topic: &TopicName,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<MessageId>, TransportError> {
        let expected = messages.len();
        let body = PublishBody {
            messages: messages
                .into_iter()
                .map(|message| WireOutboundMessage {
                    data: general_purpose::STANDARD.encode(&message.payload),
                    attributes: message.attributes,
                })
                .collect(),
        };

        let response: PublishResponse = self.post(Resource::Topic(topic), "publish", &body).await?;
        if response.message_ids.len() != expected {
            warn!(
                topic = %topic,
                expected = expected,
                returned = response.message_ids.len(),
                "Publish response message ID count does not match request"
            );
        }

        response
            .message_ids
            .iter()
            .map(|id| {
                id.parse::<MessageId>().map_err(|_| {
                    TransportError::from(SerializationError::MalformedResponse {
                        field: "messageIds".to_string(),
                    })
                })
            })
            .collect()
    }
}
