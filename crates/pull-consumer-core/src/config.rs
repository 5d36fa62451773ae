//! # Consumer Configuration
//!
//! Layered configuration for the consumer and the test-message producer.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults (every field carries a serde default)
//! 2. `config/consumer.{yaml,json,toml}` if present
//! 3. An explicit file, required when given; format chosen by extension
//! 4. Environment variables prefixed `PULL_CONSUMER__` with `__` as the
//!    nesting separator, e.g. `PULL_CONSUMER__BACKOFF__PAUSE_MS=500`
//! 5. Command line overrides ([`ConfigOverrides`])
//!
//! A malformed file or an environment value of the wrong type is an error.

use crate::backoff::BackoffScheduler;
use crate::consumer::{ConsumerSettings, DEFAULT_BATCH_SIZE};
use crate::error::ConfigError;
use crate::latency::{LatencyAnalyzer, DEFAULT_HIGH_LATENCY_THRESHOLD};
use crate::queue::PriorityOrder;
use pull_runtime::{
    ProviderType, PubSubConfig, SubscriptionName, TopicName, TransportConfig,
    DEFAULT_PUBSUB_ENDPOINT,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by the loader
pub const ENV_PREFIX: &str = "PULL_CONSUMER";

/// Optional configuration file looked up relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config/consumer";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Complete consumer and producer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Highest priority ("normal") subscription
    pub primary_subscription: String,

    /// Lower priority ("overflow") subscription
    pub secondary_subscription: String,

    /// Messages requested per pull
    pub max_messages_per_pull: u32,

    /// Total messages to receive before exiting; unset runs until shutdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_limit: Option<u64>,

    /// Traversal time above which a message is flagged
    pub high_latency_threshold_ms: u64,

    pub transport: TransportSettings,
    pub backoff: BackoffSettings,
    pub publish: PublishSettings,
    pub logging: LoggingSettings,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            primary_subscription: "test-sub".to_string(),
            secondary_subscription: "test-overflow-sub".to_string(),
            max_messages_per_pull: DEFAULT_BATCH_SIZE,
            pull_limit: None,
            high_latency_threshold_ms: DEFAULT_HIGH_LATENCY_THRESHOLD.as_millis() as u64,
            transport: TransportSettings::default(),
            backoff: BackoffSettings::default(),
            publish: PublishSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Which transport to use and how to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub provider: ProviderType,
    pub project_id: String,

    /// `host:port` of a Pub/Sub emulator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emulator_host: Option<String>,

    pub endpoint: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    pub request_timeout_seconds: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let pubsub = PubSubConfig::default();
        Self {
            provider: ProviderType::PubSub,
            project_id: pubsub.project_id,
            emulator_host: None,
            endpoint: DEFAULT_PUBSUB_ENDPOINT.to_string(),
            access_token: None,
            request_timeout_seconds: pubsub.request_timeout_seconds,
        }
    }
}

/// Pause between unproductive cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub pause_ms: u64,

    /// 1.0 keeps the pause fixed
    pub multiplier: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pause_ms: Option<u64>,

    /// 0.0 disables jitter
    pub jitter_percent: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            pause_ms: 2000,
            multiplier: 1.0,
            max_pause_ms: None,
            jitter_percent: 0.0,
        }
    }
}

impl BackoffSettings {
    pub fn scheduler(&self) -> BackoffScheduler {
        let pause = Duration::from_millis(self.pause_ms);
        let max_pause = Duration::from_millis(self.max_pause_ms.unwrap_or(self.pause_ms));

        BackoffScheduler::fixed(pause)
            .with_growth(self.multiplier, max_pause)
            .with_jitter_percent(self.jitter_percent)
    }
}

/// Topics the producer publishes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    pub topic: String,
    pub overflow_topic: String,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            topic: "test-topic".to_string(),
            overflow_topic: "test-overflow-topic".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Values supplied on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub provider: Option<ProviderType>,
    pub project_id: Option<String>,
    pub emulator_host: Option<String>,
    pub primary_subscription: Option<String>,
    pub secondary_subscription: Option<String>,
    pub max_messages_per_pull: Option<u32>,
    pub pull_limit: Option<u64>,
    pub pause_ms: Option<u64>,
    pub high_latency_threshold_ms: Option<u64>,
    pub topic: Option<String>,
    pub overflow_topic: Option<String>,
}

/// Output format of a rendered configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::invalid(
                "format",
                format!("unsupported format '{}'; expected yaml, json or toml", other),
            )),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml => f.write_str("yaml"),
            Self::Json => f.write_str("json"),
            Self::Toml => f.write_str("toml"),
        }
    }
}

impl ConsumerConfig {
    /// Load from the default sources plus an optional explicit file
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = explicit_path {
            loader = loader.with_explicit_file(path);
        }
        loader.load()
    }

    /// Apply command line overrides on top of the loaded values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(provider) = overrides.provider {
            self.transport.provider = provider;
        }
        if let Some(project_id) = &overrides.project_id {
            self.transport.project_id = project_id.clone();
        }
        if let Some(host) = &overrides.emulator_host {
            self.transport.emulator_host = Some(host.clone()).filter(|h| !h.is_empty());
        }
        if let Some(name) = &overrides.primary_subscription {
            self.primary_subscription = name.clone();
        }
        if let Some(name) = &overrides.secondary_subscription {
            self.secondary_subscription = name.clone();
        }
        if let Some(size) = overrides.max_messages_per_pull {
            self.max_messages_per_pull = size;
        }
        if let Some(limit) = overrides.pull_limit {
            self.pull_limit = Some(limit);
        }
        if let Some(pause_ms) = overrides.pause_ms {
            self.backoff.pause_ms = pause_ms;
        }
        if let Some(threshold) = overrides.high_latency_threshold_ms {
            self.high_latency_threshold_ms = threshold;
        }
        if let Some(topic) = &overrides.topic {
            self.publish.topic = topic.clone();
        }
        if let Some(topic) = &overrides.overflow_topic {
            self.publish.overflow_topic = topic.clone();
        }
    }

    /// Check every value before anything connects
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.priority_order()?;
        self.consumer_settings().validate()?;

        let max_batch = self.transport.provider.max_messages_per_pull();
        if self.max_messages_per_pull > max_batch {
            return Err(ConfigError::invalid(
                "max_messages_per_pull",
                format!(
                    "{} exceeds the {} limit of {}",
                    self.max_messages_per_pull, self.transport.provider, max_batch
                ),
            ));
        }

        let backoff = &self.backoff;
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "backoff.multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&backoff.jitter_percent) {
            return Err(ConfigError::invalid(
                "backoff.jitter_percent",
                "must be between 0.0 and 1.0",
            ));
        }
        if backoff.max_pause_ms.is_some_and(|max| max < backoff.pause_ms) {
            return Err(ConfigError::invalid(
                "backoff.max_pause_ms",
                "must not be smaller than backoff.pause_ms",
            ));
        }

        if self.transport.request_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "transport.request_timeout_seconds",
                "must be at least 1",
            ));
        }
        if let TransportConfig::PubSub(pubsub) = self.transport_config() {
            if pubsub.project_id.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "transport.project_id",
                    "must not be empty",
                ));
            }
            pubsub
                .base_url()
                .map_err(|e| ConfigError::invalid("transport.endpoint", e.to_string()))?;
        }

        TopicName::new(self.publish.topic.as_str())?;
        TopicName::new(self.publish.overflow_topic.as_str())?;

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("expected one of {}", LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }

    /// Get the primary/secondary order
    pub fn priority_order(&self) -> Result<PriorityOrder, ConfigError> {
        PriorityOrder::dual(
            SubscriptionName::new(self.primary_subscription.as_str())?,
            SubscriptionName::new(self.secondary_subscription.as_str())?,
        )
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            batch_size: self.max_messages_per_pull,
            pull_limit: self.pull_limit,
            backoff: self.backoff.scheduler(),
            analyzer: LatencyAnalyzer::new(Duration::from_millis(self.high_latency_threshold_ms)),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        match self.transport.provider {
            ProviderType::InMemory => TransportConfig::InMemory,
            ProviderType::PubSub => TransportConfig::PubSub(PubSubConfig {
                project_id: self.transport.project_id.clone(),
                emulator_host: self.transport.emulator_host.clone(),
                endpoint: self.transport.endpoint.clone(),
                access_token: self.transport.access_token.clone(),
                request_timeout_seconds: self.transport.request_timeout_seconds,
            }),
        }
    }

    /// Copy of this configuration with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.transport.access_token.is_some() {
            copy.transport.access_token = Some("********".to_string());
        }
        copy
    }

    /// Serialize the configuration in the requested format
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let rendered = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        };

        rendered.map_err(|message| ConfigError::Render { message })
    }
}

/// Builds a [`ConsumerConfig`] from files and environment variables
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    default_file: Option<PathBuf>,
    explicit_file: Option<PathBuf>,
    environment: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader reading `config/consumer.*` and the process environment
    pub fn new() -> Self {
        Self {
            default_file: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            explicit_file: None,
            environment: None,
        }
    }

    /// Look for the optional file at `base` (without extension) instead
    pub fn with_default_file(mut self, base: Option<PathBuf>) -> Self {
        self.default_file = base;
        self
    }

    /// Add a required file whose format follows its extension
    pub fn with_explicit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_environment(mut self, vars: HashMap<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    pub fn load(self) -> Result<ConsumerConfig, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(base) = &self.default_file {
            builder = builder.add_source(
                config::File::with_name(&base.to_string_lossy()).required(false),
            );
        }

        if let Some(path) = &self.explicit_file {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(self.environment);
        let settings = builder.add_source(environment).build()?;

        Ok(settings.try_deserialize()?)
    }
}
