//! Queue facade.
//!
//! [`AsbHelper`] gates every queue access behind configuration and parameter
//! validation and turns high-level calls into transport operations. In dry-run
//! mode all validation and envelope construction still happen but the transport
//! is never contacted.
//!
//! ## Resource lifetime
//!
//! Each call acquires its own client (tagged with the caller's `who_iam`) and a
//! sender or receiver for the configured queue, and closes both before
//! returning, whether the operation succeeded or not. Close failures are logged
//! and never mask the operation's own result.
//!
//! ## Receive window
//!
//! A receive call arms a timer that cancels a [`CancellationToken`] owned by that
//! call. The pull loop races every long poll against the token, so the window
//! ends on time even while a poll is outstanding.

use crate::config::AsbConfig;
use crate::error::{AsbError, TransportError};
use crate::message::{OutboundEnvelope, ReceiveSummary, ReceivedMessage, SendOptions, SentMessage};
use crate::transport::{AzureServiceBusTransport, MessageReceiver, QueueTransport};
use crate::utility;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "helper_tests.rs"]
mod tests;

/// Content type stamped on every outbound envelope
pub const CONTENT_TYPE: &str = "application/json";

/// Upper bound accepted for a receive window, in minutes
pub const MAX_WAIT_TIME_MINUTES: f64 = 60.0;

/// Longest single poll inside a receive window
const RECEIVE_POLL_TIMEOUT: Duration = Duration::from_secs(30);

const OPERATION_GUIDANCE: &str = "check connection string or queue name";

/// Handles messages pulled during a receive window
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process_message(&self, message: ReceivedMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageProcessor for F
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process_message(&self, message: ReceivedMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Azure Service Bus facade
pub struct AsbHelper<T = AzureServiceBusTransport> {
    config: AsbConfig,
    transport: T,
}

impl AsbHelper<AzureServiceBusTransport> {
    /// Facade over the Azure Service Bus REST transport
    pub fn new(config: AsbConfig) -> Self {
        Self::with_transport(config, AzureServiceBusTransport::new())
    }
}

impl<T> AsbHelper<T>
where
    T: QueueTransport,
{
    pub fn with_transport(config: AsbConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &AsbConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Lifecycle hook; clients are opened per call so there is nothing to do
    pub fn open(&self, _reset: bool) {}

    /// Lifecycle hook; see [`AsbHelper::open`]
    pub fn close(&self) {}

    pub fn content_type() -> &'static str {
        CONTENT_TYPE
    }

    /// In most cases this could be unbounded; the demo sets a limit
    pub fn max_wait_time_minutes() -> f64 {
        MAX_WAIT_TIME_MINUTES
    }

    pub fn is_config_valid(&self) -> bool {
        self.config.is_valid()
    }

    pub fn is_valid(&self) -> bool {
        self.is_config_valid()
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// - [`AsbError::Config`] (`queue`) when the configuration is unusable
    /// - [`AsbError::Param`] (`whoIam`, `messageBody`, `deliveryDelaySeconds`) for bad arguments
    /// - [`AsbError::Operation`] when the transport fails
    pub async fn send(
        &self,
        message_body: impl Into<Value>,
        who_iam: &str,
        options: SendOptions,
    ) -> Result<SentMessage, AsbError> {
        let now = Utc::now();

        if !self.is_valid() || utility::is_blank(&self.config.queue) {
            return Err(AsbError::config("queue", "please supply a valid value"));
        }

        if utility::is_blank(who_iam) {
            return Err(AsbError::param("whoIam", "A \"whoIam\" is required"));
        }

        let body = message_body.into();
        if utility::is_blank_value(&body) {
            return Err(AsbError::param("messageBody", "A \"message\" is required"));
        }

        let delivery_delay_seconds = if utility::is_number(options.delivery_delay_seconds) {
            options.delivery_delay_seconds
        } else {
            0.0
        };

        let scheduled_enqueue_time_utc = if delivery_delay_seconds > 0.0 {
            let millis = (delivery_delay_seconds * 1000.0).round() as i64;
            let at = TimeDelta::try_milliseconds(millis)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| {
                    AsbError::param("deliveryDelaySeconds", "delay is too large to schedule")
                })?;
            Some(at)
        } else {
            None
        };

        let envelope = OutboundEnvelope {
            body,
            content_type: CONTENT_TYPE.to_string(),
            correlation_id: or_new_uuid(options.correlation_id),
            message_id: or_new_uuid(options.message_id),
            subject: Some(options.subject).filter(|s| !utility::is_blank(s)),
            application_properties: Some(options.application_properties)
                .filter(|p| !p.is_empty()),
            scheduled_enqueue_time_utc,
        };

        debug!(
            message_id = %envelope.message_id,
            correlation_id = %envelope.correlation_id,
            scheduled = ?envelope.scheduled_enqueue_time_utc,
            "Built outbound envelope"
        );

        if self.config.dry_run {
            info!(
                queue = %self.config.queue,
                message_id = %envelope.message_id,
                who_iam,
                "Dry run, message not sent"
            );
        } else {
            self.transmit(&envelope, who_iam)
                .await
                .map_err(|e| AsbError::operation(e, OPERATION_GUIDANCE))?;

            info!(
                queue = %self.config.queue,
                message_id = %envelope.message_id,
                who_iam,
                delivery_delay_seconds,
                "Message sent"
            );
        }

        Ok(SentMessage {
            envelope,
            delivery_delay_seconds,
            who_iam: who_iam.to_string(),
        })
    }

    /// Receive messages for `minutes_to_wait` minutes, handing each to `processor`.
    ///
    /// Processor failures are counted and logged; they do not end the window.
    ///
    /// # Errors
    ///
    /// - [`AsbError::Param`] (`minutesToWait`, `whoIam`) for bad arguments
    /// - [`AsbError::Config`] (`queue`) when a live window cannot be opened
    /// - [`AsbError::Operation`] when the transport fails
    pub async fn receive<P>(
        &self,
        minutes_to_wait: f64,
        who_iam: &str,
        processor: &P,
    ) -> Result<ReceiveSummary, AsbError>
    where
        P: MessageProcessor + ?Sized,
    {
        let max = Self::max_wait_time_minutes();
        if !utility::is_number(minutes_to_wait) || minutes_to_wait <= 0.0 || minutes_to_wait > max
        {
            return Err(AsbError::param(
                "minutesToWait",
                format!("Must be a number greater than 0 and at most {}", max),
            ));
        }

        if utility::is_blank(who_iam) {
            return Err(AsbError::param("whoIam", "A \"whoIam\" is required"));
        }

        if self.config.dry_run {
            info!(minutes_to_wait, who_iam, "Dry run, receive window skipped");
            return Ok(ReceiveSummary {
                skipped: true,
                ..Default::default()
            });
        }

        if !self.is_valid() {
            return Err(AsbError::config("queue", "please supply a valid value"));
        }

        let window = Duration::from_secs_f64(minutes_to_wait * 60.0);
        let deadline = Instant::now() + window;
        let cancel = CancellationToken::new();

        let timer = {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                token.cancel();
            })
        };

        info!(
            queue = %self.config.queue,
            minutes_to_wait,
            who_iam,
            "Receive window opened"
        );

        let result = self.pump(who_iam, processor, &cancel, deadline).await;
        timer.abort();

        let summary = result.map_err(|e| AsbError::operation(e, OPERATION_GUIDANCE))?;

        info!(
            received = summary.received,
            processed = summary.processed,
            failed = summary.failed,
            "Receive window closed"
        );

        Ok(summary)
    }

    async fn transmit(
        &self,
        envelope: &OutboundEnvelope,
        who_iam: &str,
    ) -> Result<(), TransportError> {
        let client = self
            .transport
            .connect(&self.config.connection_string, who_iam)
            .await?;

        let result = async {
            let sender = client.create_sender(&self.config.queue).await?;
            let sent = sender.send_message(envelope).await;
            log_release("sender", sender.close().await);
            sent
        }
        .await;

        log_release("client", client.close().await);
        result
    }

    async fn pump<P>(
        &self,
        who_iam: &str,
        processor: &P,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<ReceiveSummary, TransportError>
    where
        P: MessageProcessor + ?Sized,
    {
        let client = self
            .transport
            .connect(&self.config.connection_string, who_iam)
            .await?;

        let result = async {
            let receiver = client.create_receiver(&self.config.queue).await?;
            let dispatched = dispatch(receiver.as_ref(), processor, cancel, deadline).await;
            log_release("receiver", receiver.close().await);
            dispatched
        }
        .await;

        log_release("client", client.close().await);
        result
    }
}

async fn dispatch<P>(
    receiver: &dyn MessageReceiver,
    processor: &P,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<ReceiveSummary, TransportError>
where
    P: MessageProcessor + ?Sized,
{
    let mut summary = ReceiveSummary::default();

    loop {
        // The deadline can pass before the timer task cancels the token
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let poll_timeout = remaining.min(RECEIVE_POLL_TIMEOUT);

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = receiver.receive_message(poll_timeout) => Some(result),
        };

        let Some(result) = polled else { break };
        let Some(message) = result? else { continue };

        summary.received += 1;
        let message_id = message.message_id.clone();

        match processor.process_message(message).await {
            Ok(()) => {
                summary.processed += 1;
                debug!(message_id = %message_id, "Message processed");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(message_id = %message_id, error = %e, "Message processor failed");
            }
        }
    }

    Ok(summary)
}

fn or_new_uuid(value: String) -> String {
    if utility::is_blank(&value) {
        Uuid::new_v4().to_string()
    } else {
        value
    }
}

fn log_release(resource: &'static str, result: Result<(), TransportError>) {
    if let Err(e) = result {
        warn!(resource, error = %e, "Failed to release transport resource");
    }
}
