//! # ASB Demo CLI
//!
//! Command-line front end for the Azure Service Bus demo client.
//!
//! A run loads a JSON configuration file (falling back to environment variables
//! when the file does not yield a usable connection), optionally sends a bounded
//! batch of demo messages and optionally receives messages for a bounded number
//! of minutes. Every termination path maps to a distinct process exit code.

use asb_demo_core::{
    utility, AsbConfig, AsbError, AsbHelper, AzureServiceBusTransport, DemoMessage,
    QueueTransport, ReceiveSummary, ReceivedMessage, SendOptions, SentMessage,
};
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Largest batch a single run may send
pub const MAX_SEND_COUNT: i64 = 20;

/// Longest receive window a single run may open, in minutes
pub const MAX_RECEIVE_MINUTES: i64 = 5;

/// Identity used for every transport call made by the demo
pub const WHO_IAM: &str = "test";

/// Kind stamped on every demo message
pub const DEMO_KIND: &str = "Test";

/// Upper bound for the random delivery delay of a demo message, in seconds
const MAX_DEMO_DELAY_SECONDS: f64 = 600.0;

// ============================================================================
// CLI Structure
// ============================================================================

/// Azure Service Bus demo client
#[derive(Debug, Parser)]
#[command(name = "asb-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and receive demo messages on an Azure Service Bus queue")]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// How many messages to send (0 to 20)
    #[arg(short, long, default_value_t = 0)]
    pub send: i64,

    /// Receive messages for this many minutes (0 to 5)
    #[arg(short, long, default_value_t = 0)]
    pub receive: i64,

    /// Logging level or filter directive, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// Reasons a run ends early
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Unable to find '-config' file: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Unable to read '-config' file {}: {source}", path.display())]
    ConfigFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection String or Queue name is invalid from file or environment variables")]
    InvalidConnection,

    #[error("Send can not exceed {limit}.")]
    SendLimitExceeded { limit: i64 },

    #[error("receive can not exceed {limit} minutes")]
    ReceiveLimitExceeded { limit: i64 },

    #[error("{0}")]
    Operation(#[from] AsbError),

    #[error("Failed to encode demo message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to initialize logging: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigFileNotFound { .. } | Self::ConfigFileUnreadable { .. } => 8,
            Self::InvalidConnection => 6,
            Self::SendLimitExceeded { .. } => 4,
            Self::ReceiveLimitExceeded { .. } => 5,
            Self::Operation(_) | Self::Serialization(_) => 3,
            Self::Logging { .. } => 1,
        }
    }
}

// ============================================================================
// Termination
// ============================================================================

/// Termination signals that end a run early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Terminate,
    Quit,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Terminate => -1,
            Self::Quit => -2,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Terminate => "Received SIGTERM, performing graceful shutdown.",
            Self::Quit => "Received SIGQUIT, performing graceful shutdown.",
        }
    }
}

/// Resolve once SIGTERM or SIGQUIT arrives
#[cfg(unix)]
pub async fn wait_for_termination() -> Termination {
    use tokio::signal::unix::{signal, SignalKind};

    async fn wait_for(kind: SignalKind, name: &'static str) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(signal = name, error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    }

    tokio::select! {
        _ = wait_for(SignalKind::terminate(), "SIGTERM") => Termination::Terminate,
        _ = wait_for(SignalKind::quit(), "SIGQUIT") => Termination::Quit,
    }
}

/// Neither signal exists off unix; never resolves
#[cfg(not(unix))]
pub async fn wait_for_termination() -> Termination {
    std::future::pending().await
}

/// Print the termination message to stdout as a JSON string
pub fn report(message: &str) {
    println!("{}", Value::from(message));
}

// ============================================================================
// Run
// ============================================================================

/// What a completed run did
#[derive(Debug, Default)]
pub struct RunReport {
    pub sent: Vec<SentMessage>,
    pub received: Option<ReceiveSummary>,
}

/// Initialize logging based on CLI arguments.
///
/// `RUST_LOG` wins over `log_level` when set. Output goes to stderr so stdout
/// carries only the termination message.
pub fn initialize_logging(log_level: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
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

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load the configuration file, falling back to the environment.
///
/// A missing or unreadable file is fatal. A file that does not parse counts as an
/// unusable configuration. Dry-run is always switched off for CLI runs.
pub fn load_configuration<F>(path: &Path, lookup: F) -> Result<AsbConfig, CliError>
where
    F: Fn(&str) -> Option<String>,
{
    if !path.exists() {
        return Err(CliError::ConfigFileNotFound {
            path: path.to_path_buf(),
        });
    }

    let text = std::fs::read_to_string(path).map_err(|source| CliError::ConfigFileUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = match AsbConfig::from_json(&text) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Configuration file is not valid JSON");
            AsbConfig::default()
        }
    };
    config.dry_run = false;

    if !config.is_valid() {
        info!("Configuration file incomplete, reading connection from environment");
        config.apply_environment(lookup);
    }

    if !config.is_valid() {
        return Err(CliError::InvalidConnection);
    }

    Ok(config)
}

/// Check the requested counts, returning `(send, receive_minutes)`.
///
/// A negative send count means no sends; a receive count of zero or less means no
/// receive window.
pub fn validate_counts(send: i64, receive: i64) -> Result<(u32, u32), CliError> {
    let send = send.max(0);
    if send > MAX_SEND_COUNT {
        return Err(CliError::SendLimitExceeded {
            limit: MAX_SEND_COUNT,
        });
    }

    if receive > MAX_RECEIVE_MINUTES {
        return Err(CliError::ReceiveLimitExceeded {
            limit: MAX_RECEIVE_MINUTES,
        });
    }

    Ok((send as u32, receive.max(0) as u32))
}

/// Run against Azure Service Bus using the process environment
pub async fn run(cli: &Cli) -> Result<RunReport, CliError> {
    run_with(
        cli,
        |key| std::env::var(key).ok(),
        AzureServiceBusTransport::new(),
    )
    .await
}

/// Run with an injected environment lookup and transport
pub async fn run_with<T, F>(cli: &Cli, lookup: F, transport: T) -> Result<RunReport, CliError>
where
    T: QueueTransport,
    F: Fn(&str) -> Option<String>,
{
    let config = load_configuration(&cli.config, lookup)?;
    let helper = AsbHelper::with_transport(config, transport);

    let (send, receive) = validate_counts(cli.send, cli.receive)?;
    let mut report = RunReport::default();

    if send > 0 {
        report.sent = send_batch(&helper, send).await?;
    }

    if receive > 0 {
        let summary = helper
            .receive(f64::from(receive), WHO_IAM, &log_message)
            .await?;
        report.received = Some(summary);
    }

    Ok(report)
}

/// Send `count` demo messages in order; the first failure ends the batch
async fn send_batch<T>(helper: &AsbHelper<T>, count: u32) -> Result<Vec<SentMessage>, CliError>
where
    T: QueueTransport,
{
    let stamp = utility::make_stamp(Utc::now());
    let mut sent = Vec::with_capacity(count as usize);

    for index in 1..=count {
        let delay = utility::dice(0.0, MAX_DEMO_DELAY_SECONDS).round();
        let body = format!("{}; {}; Index {}; {}", stamp, DEMO_KIND, index, delay);
        let json = DemoMessage::new(DEMO_KIND, body).to_json()?;

        let message = helper
            .send(json, WHO_IAM, SendOptions::new().with_delay_seconds(delay))
            .await?;

        debug!(index, message_id = %message.message_id, delay, "Demo message sent");
        sent.push(message);
    }

    info!(count = sent.len(), "Send batch complete");
    Ok(sent)
}

async fn log_message(message: ReceivedMessage) -> anyhow::Result<()> {
    match DemoMessage::from_json(&message.body) {
        Some(demo) => info!(
            message_id = %message.message_id,
            kind = %demo.kind,
            body = %demo.message,
            "Received demo message"
        ),
        None => info!(
            message_id = %message.message_id,
            body = %message.body,
            "Received message"
        ),
    }

    Ok(())
}
