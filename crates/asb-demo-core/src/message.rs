//! Message types for send and receive operations.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Deref;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

// ============================================================================
// Outbound
// ============================================================================

/// The structured message handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub body: Value,
    pub content_type: String,
    pub correlation_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_properties: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_enqueue_time_utc: Option<DateTime<Utc>>,
}

impl OutboundEnvelope {
    /// Body as transmitted: strings go out verbatim, anything else as JSON text
    pub fn body_text(&self) -> Result<String, serde_json::Error> {
        match &self.body {
            Value::String(s) => Ok(s.clone()),
            other => serde_json::to_string(other),
        }
    }
}

/// An envelope as returned from a send, with the bookkeeping fields the caller
/// logs alongside it. These two fields are never transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    #[serde(flatten)]
    pub envelope: OutboundEnvelope,
    pub delivery_delay_seconds: f64,
    pub who_iam: String,
}

impl Deref for SentMessage {
    type Target = OutboundEnvelope;

    fn deref(&self) -> &Self::Target {
        &self.envelope
    }
}

/// Optional arguments for a send.
///
/// Blank identifiers are replaced with fresh UUIDs; a blank subject and an empty
/// property map are left off the envelope.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Seconds before the message becomes visible to receivers
    pub delivery_delay_seconds: f64,
    pub subject: String,
    pub message_id: String,
    pub correlation_id: String,
    pub application_properties: HashMap<String, String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_seconds(mut self, seconds: f64) -> Self {
        self.delivery_delay_seconds = seconds;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// A message pulled from the queue and handed to a processor
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
    pub delivery_count: u32,
    pub sequence_number: Option<i64>,
    pub enqueued_time_utc: Option<DateTime<Utc>>,
    pub application_properties: HashMap<String, String>,
}

impl ReceivedMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            correlation_id: None,
            subject: None,
            content_type: None,
            body: body.into(),
            delivery_count: 1,
            sequence_number: None,
            enqueued_time_utc: None,
            application_properties: HashMap::new(),
        }
    }

    /// Rebuild what a receiver would see for a sent envelope
    pub fn from_envelope(envelope: &OutboundEnvelope) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: envelope.message_id.clone(),
            correlation_id: Some(envelope.correlation_id.clone()),
            subject: envelope.subject.clone(),
            content_type: Some(envelope.content_type.clone()),
            body: envelope.body_text()?,
            delivery_count: 1,
            sequence_number: None,
            enqueued_time_utc: Some(envelope.scheduled_enqueue_time_utc.unwrap_or_else(Utc::now)),
            application_properties: envelope.application_properties.clone().unwrap_or_default(),
        })
    }

    /// Decode the body as JSON
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Outcome of a receive window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    /// True when the window was never opened because of dry-run
    pub skipped: bool,
}
