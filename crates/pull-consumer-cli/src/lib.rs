//! # Pull Consumer CLI
//!
//! Command-line harness around the priority pull consumer.
//!
//! Provides commands for:
//! - Draining the primary and secondary subscriptions in priority order
//! - Publishing structured or plain test messages
//! - Inspecting the resolved configuration
//! - Generating shell completions

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use pull_consumer_core::{
    shutdown, ConfigError, ConfigFormat, ConfigOverrides, ConsumerConfig, MessageObserver,
    MessageRecord, PayloadMode, PriorityConsumer, PublishError, PublishRequest, ShutdownTrigger,
    TestProducer, TracingObserver,
};
use pull_runtime::{ProviderType, TopicName, TransportError, TransportFactory};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Priority pull consumer test harness
#[derive(Parser, Debug)]
#[command(
    name = "pull-consumer",
    version = env!("CARGO_PKG_VERSION"),
    about = "Drain two subscriptions in priority order and report message latency",
    long_about = None
)]
pub struct Cli {
    /// Configuration file path (yaml, json or toml)
    #[arg(short, long, global = true, env = "PULL_CONSUMER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pull from the primary subscription first, falling back to the overflow subscription
    Consume(ConsumeArgs),

    /// Publish test messages to the normal or overflow topic
    Publish(PublishArgs),

    /// Validate or show the resolved configuration
    Config {
        /// Print the configuration with secrets masked
        #[arg(short, long)]
        show: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "yaml")]
        format: ConfigFormatArg,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Transport selection shared by the consume and publish commands
#[derive(Args, Debug, Clone, Default)]
pub struct TransportArgs {
    /// Transport provider
    #[arg(long, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Pub/Sub project
    #[arg(long, env = "PUBSUB_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Pub/Sub emulator `host:port`; an empty value disables the emulator
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Primary ("normal") subscription
    #[arg(long, env = "PUBSUB_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Secondary ("overflow") subscription
    #[arg(long, env = "PUBSUB_OVERFLOW_SUBSCRIPTION")]
    pub overflow_subscription: Option<String>,

    /// Stop after this many messages; runs until interrupted when unset
    #[arg(long, env = "PULL_LIMIT")]
    pub pull_limit: Option<u64>,

    /// Messages requested per pull
    #[arg(short, long)]
    pub batch_size: Option<u32>,

    /// Pause after an empty or failed cycle, in milliseconds
    #[arg(long)]
    pub pause_ms: Option<u64>,

    /// Traversal time above which a message is flagged, in milliseconds
    #[arg(long)]
    pub high_latency_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub transport: TransportArgs,

    /// Which topic to publish to
    #[arg(short, long, value_enum, default_value = "normal")]
    pub queue: QueueArg,

    /// Number of messages to publish
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,

    /// Message content; numbered per message when publishing a batch
    #[arg(long)]
    pub content: Option<String>,

    /// Publish raw text without a timestamp
    #[arg(long)]
    pub plain: bool,

    /// Normal topic
    #[arg(long, env = "PUBSUB_TOPIC")]
    pub topic: Option<String>,

    /// Overflow topic
    #[arg(long, env = "PUBSUB_OVERFLOW_TOPIC")]
    pub overflow_topic: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderArg {
    Pubsub,
    Memory,
}

impl From<ProviderArg> for ProviderType {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Pubsub => ProviderType::PubSub,
            ProviderArg::Memory => ProviderType::InMemory,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueArg {
    Normal,
    Overflow,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormatArg {
    Yaml,
    Json,
    Toml,
}

impl From<ConfigFormatArg> for ConfigFormat {
    fn from(arg: ConfigFormatArg) -> Self {
        match arg {
            ConfigFormatArg::Yaml => ConfigFormat::Yaml,
            ConfigFormatArg::Json => ConfigFormat::Json,
            ConfigFormatArg::Toml => ConfigFormat::Toml,
        }
    }
}

impl Commands {
    /// Configuration values supplied by this command's flags
    pub fn overrides(&self) -> ConfigOverrides {
        match self {
            Commands::Consume(args) => ConfigOverrides {
                primary_subscription: args.subscription.clone(),
                secondary_subscription: args.overflow_subscription.clone(),
                pull_limit: args.pull_limit,
                max_messages_per_pull: args.batch_size,
                pause_ms: args.pause_ms,
                high_latency_threshold_ms: args.high_latency_ms,
                ..args.transport.overrides()
            },
            Commands::Publish(args) => ConfigOverrides {
                topic: args.topic.clone(),
                overflow_topic: args.overflow_topic.clone(),
                ..args.transport.overrides()
            },
            Commands::Config { .. } | Commands::Completions { .. } => ConfigOverrides::default(),
        }
    }
}

impl TransportArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            provider: self.provider.map(ProviderType::from),
            project_id: self.project_id.clone(),
            emulator_host: self.emulator_host.clone(),
            ..Default::default()
        }
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 1,
            CliError::Transport(_) => 2,
            CliError::CommandFailed { .. } => 3,
            CliError::InvalidArgument { .. } => 4,
            CliError::Io(_) => 5,
        }
    }
}

impl From<PublishError> for CliError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::EmptyBatch => CliError::InvalidArgument {
                arg: "count".to_string(),
                message: "must be at least 1".to_string(),
            },
            PublishError::Transport(source) => CliError::Transport(source),
            PublishError::Encode(source) => CliError::CommandFailed {
                message: format!("failed to encode test message: {}", source),
            },
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    run(Cli::parse()).await
}

/// Execute an already parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Completions { shell } = &cli.command {
        return execute_completions_command(*shell);
    }

    let config = resolve_configuration(&cli)?;
    initialize_logging(&config)?;

    match cli.command {
        Commands::Consume(_) => execute_consume_command(config).await,
        Commands::Publish(args) => execute_publish_command(config, &args).await,
        Commands::Config { show, format } => execute_config_command(&config, show, format.into()),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Load layered configuration and apply global and per-command flags
pub fn resolve_configuration(cli: &Cli) -> Result<ConsumerConfig, ConfigError> {
    let mut config = ConsumerConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&cli.command.overrides());

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json_logs;

    config.validate()?;
    Ok(config)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Install the global subscriber. Logs go to stderr so command output stays parseable.
fn initialize_logging(config: &ConsumerConfig) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(&config.logging.level).map_err(|e| CliError::InvalidArgument {
                arg: "log-level".to_string(),
                message: e.to_string(),
            })?
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

/// Prints each record to stdout in addition to the structured log event
struct ConsoleObserver;

impl MessageObserver for ConsoleObserver {
    fn on_message(&self, record: &MessageRecord) {
        println!("{}", record);
        TracingObserver.on_message(record);
    }
}

async fn execute_consume_command(config: ConsumerConfig) -> Result<(), CliError> {
    let order = config.priority_order()?;
    let connector = Arc::new(TransportFactory::new(config.transport_config()));
    let mut consumer = PriorityConsumer::new(connector, order, config.consumer_settings())?
        .with_observer(Arc::new(ConsoleObserver));

    info!(
        provider = %config.transport.provider,
        primary = %config.primary_subscription,
        secondary = %config.secondary_subscription,
        pull_limit = ?config.pull_limit,
        "Starting priority consumer"
    );

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(shutdown_signal(trigger));

    let summary = consumer.run(shutdown).await;
    let counters = &summary.counters;
    println!(
        "Received {} messages in {} cycles ({} high latency, {} pull failures, {} ack failures), stopped by {:?}",
        counters.received_count,
        counters.cycles,
        counters.high_latency_count,
        counters.pull_failures,
        counters.ack_failures,
        summary.reason
    );
    Ok(())
}

async fn execute_publish_command(config: ConsumerConfig, args: &PublishArgs) -> Result<(), CliError> {
    let topic = match args.queue {
        QueueArg::Normal => &config.publish.topic,
        QueueArg::Overflow => &config.publish.overflow_topic,
    };
    let topic = TopicName::new(topic.as_str()).map_err(ConfigError::from)?;

    if config.transport.provider == ProviderType::InMemory {
        warn!("Publishing to the in-memory provider; messages are dropped on exit");
    }

    let publisher = TransportFactory::new(config.transport_config()).create_publisher()?;
    let request = PublishRequest {
        count: args.count,
        content: args.content.clone(),
        mode: if args.plain {
            PayloadMode::Plain
        } else {
            PayloadMode::Structured
        },
    };

    let ids = TestProducer::new(publisher).publish(&topic, &request).await?;
    for id in &ids {
        println!("{}", id);
    }
    info!(topic = %topic, count = ids.len(), "Publish complete");
    Ok(())
}

fn execute_config_command(
    config: &ConsumerConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    if show {
        println!("{}", config.redacted().render(format)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

fn execute_completions_command(shell: clap_complete::Shell) -> Result<(), CliError> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
    Ok(())
}

/// Resolve once on SIGINT or SIGTERM, then request shutdown
async fn shutdown_signal(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping consumer"),
        _ = terminate => info!("Received SIGTERM, stopping consumer"),
    }

    trigger.trigger();
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
