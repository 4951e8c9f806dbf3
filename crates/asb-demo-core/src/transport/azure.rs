//! Azure Service Bus provider over the HTTPS REST API.
//!
//! Requests are authenticated with a Shared Access Signature derived from the
//! `SharedAccessKeyName`/`SharedAccessKey` pair in the connection string:
//!
//! ```text
//! SharedAccessSignature sr=<url-encoded resource uri>
//!     &sig=<url-encoded base64(HMAC-SHA256(key, "<encoded uri>\n<expiry>"))>
//!     &se=<expiry, unix seconds>&skn=<key name>
//! ```
//!
//! ## Operations
//!
//! - **Send**: `POST {endpoint}/{queue}/messages`, broker metadata in the
//!   `BrokerProperties` header, application properties as one header each.
//! - **Receive**: `DELETE {endpoint}/{queue}/messages/head?timeout=N`
//!   (receive-and-delete). `200` carries a message, `204` means none arrived.
//!
//! The `sb://` scheme of a namespace endpoint is rewritten to `https://`. An
//! `http://` or `https://` endpoint is used as is, which allows pointing the
//! provider at a local emulator.

use crate::error::TransportError;
use crate::message::{OutboundEnvelope, ReceivedMessage};
use crate::transport::{MessageReceiver, MessageSender, QueueTransport, TransportClient};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

type HmacSha256 = Hmac<Sha256>;

const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";
const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ============================================================================
// Connection String
// ============================================================================

/// Parsed Service Bus connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Base URL of the namespace, always ending in `/`
    pub endpoint: Url,
    pub key_name: String,
    pub key: String,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value` pairs separated by `;`. Keys are case-insensitive and
    /// values may themselves contain `=` (base64 keys do).
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| invalid(format!(
                "segment '{}' is not a key=value pair",
                part
            )))?;
            let value = value.trim().to_string();

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "entitypath" => entity_path = Some(value),
                _ => {}
            }
        }

        let endpoint = endpoint
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid("Endpoint is required".to_string()))?;
        let key_name = key_name
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid("SharedAccessKeyName is required".to_string()))?;
        let key = key
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid("SharedAccessKey is required".to_string()))?;

        Ok(Self {
            endpoint: Self::parse_endpoint(&endpoint)?,
            key_name,
            key,
            entity_path: entity_path.filter(|v| !v.is_empty()),
        })
    }

    fn parse_endpoint(endpoint: &str) -> Result<Url, TransportError> {
        let mut normalized = match endpoint.strip_prefix("sb://") {
            Some(rest) => format!("https://{}", rest),
            None => endpoint.to_string(),
        };
        if !normalized.ends_with('/') {
            normalized.push('/');
        }

        let url = Url::parse(&normalized)
            .map_err(|e| invalid(format!("Endpoint '{}' is not a valid URL: {}", endpoint, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported endpoint scheme '{}'", other))),
        }
    }

    /// Resource URI a token for `queue` is scoped to. The queue segment is
    /// percent-encoded exactly as in [`ConnectionString::entity_url`].
    pub fn resource_uri(&self, queue: &str) -> String {
        format!("{}{}", self.endpoint, urlencoding::encode(queue))
    }

    /// Request URL for `suffix` under the queue's resource URI
    pub fn entity_url(&self, queue: &str, suffix: &str) -> Result<Url, TransportError> {
        let text = format!("{}/{}", self.resource_uri(queue), suffix);
        Url::parse(&text).map_err(|e| TransportError::QueueNotFound(format!("{}: {}", queue, e)))
    }
}

fn invalid(message: String) -> TransportError {
    TransportError::InvalidConnectionString { message }
}

// ============================================================================
// Shared Access Signature
// ============================================================================

/// Signs resource URIs with a shared access key
#[derive(Clone)]
struct SasSigner {
    key_name: String,
    key: String,
    ttl: chrono::Duration,
}

impl SasSigner {
    fn new(key_name: String, key: String, ttl: chrono::Duration) -> Self {
        Self { key_name, key, ttl }
    }

    /// Build the `Authorization` header value for `resource_uri`, valid until `now + ttl`
    fn token(&self, resource_uri: &str, now: DateTime<Utc>) -> Result<String, TransportError> {
        let expiry = (now + self.ttl).timestamp();
        let encoded_uri = urlencoding::encode(resource_uri);
        let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|e| TransportError::Authentication(format!("Invalid signing key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expiry,
            self.key_name
        ))
    }
}

// ============================================================================
// Broker Properties
// ============================================================================

/// JSON carried in the `BrokerProperties` header
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_enqueue_time_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enqueued_time_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence_number: Option<i64>,
}

impl BrokerProperties {
    fn from_envelope(envelope: &OutboundEnvelope) -> Self {
        Self {
            message_id: Some(envelope.message_id.clone()),
            correlation_id: Some(envelope.correlation_id.clone()),
            label: envelope.subject.clone(),
            scheduled_enqueue_time_utc: envelope
                .scheduled_enqueue_time_utc
                .map(|at| at.format(RFC1123_FORMAT).to_string()),
            ..Default::default()
        }
    }
}

fn parse_rfc1123(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn map_http_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Network(format!("Request timeout: {}", e))
    } else if e.is_connect() {
        TransportError::Network(format!("Connection failed: {}", e))
    } else if e.is_builder() {
        TransportError::Serialization(format!("Invalid request: {}", e))
    } else {
        TransportError::Network(format!("HTTP request failed: {}", e))
    }
}

async fn error_from_response(response: reqwest::Response, queue: &str) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::from_status(status, queue, body)
}

// ============================================================================
// Transport
// ============================================================================

/// Azure Service Bus transport.
///
/// Each [`QueueTransport::connect`] builds its own HTTP client tagged with the
/// caller identifier; nothing is pooled across calls.
#[derive(Debug, Clone)]
pub struct AzureServiceBusTransport {
    request_timeout: Duration,
    token_ttl: chrono::Duration,
}

impl Default for AzureServiceBusTransport {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            token_ttl: chrono::Duration::hours(1),
        }
    }
}

impl AzureServiceBusTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout for send requests; receive requests add their poll wait to it
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }
}

#[async_trait]
impl QueueTransport for AzureServiceBusTransport {
    #[instrument(skip(self, connection_string))]
    async fn connect(
        &self,
        connection_string: &str,
        identifier: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError> {
        let connection = ConnectionString::parse(connection_string)?;
        let signer = SasSigner::new(
            connection.key_name.clone(),
            connection.key.clone(),
            self.token_ttl,
        );

        let http = HttpClient::builder()
            .user_agent(format!(
                "asb-demo/{} ({})",
                env!("CARGO_PKG_VERSION"),
                identifier
            ))
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;

        debug!(endpoint = %connection.endpoint, "Opened Service Bus client");

        Ok(Box::new(ServiceBusClient {
            inner: Arc::new(ClientInner {
                http,
                connection,
                signer,
                identifier: identifier.to_string(),
                request_timeout: self.request_timeout,
            }),
        }))
    }
}

struct ClientInner {
    http: HttpClient,
    connection: ConnectionString,
    signer: SasSigner,
    identifier: String,
    request_timeout: Duration,
}

impl ClientInner {
    fn entity_url(&self, queue: &str, suffix: &str) -> Result<Url, TransportError> {
        self.connection.entity_url(queue, suffix)
    }

    fn authorization(&self, queue: &str) -> Result<String, TransportError> {
        self.signer
            .token(&self.connection.resource_uri(queue), Utc::now())
    }
}

struct ServiceBusClient {
    inner: Arc<ClientInner>,
}

#[async_trait]
impl TransportClient for ServiceBusClient {
    async fn create_sender(&self, queue: &str) -> Result<Box<dyn MessageSender>, TransportError> {
        Ok(Box::new(ServiceBusSender {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
        }))
    }

    async fn create_receiver(
        &self,
        queue: &str,
    ) -> Result<Box<dyn MessageReceiver>, TransportError> {
        Ok(Box::new(ServiceBusReceiver {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!(identifier = %self.inner.identifier, "Closed Service Bus client");
        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.inner.identifier
    }
}

struct ServiceBusSender {
    inner: Arc<ClientInner>,
    queue: String,
}

#[async_trait]
impl MessageSender for ServiceBusSender {
    #[instrument(skip(self, envelope), fields(queue = %self.queue, message_id = %envelope.message_id))]
    async fn send_message(&self, envelope: &OutboundEnvelope) -> Result<(), TransportError> {
        let url = self.inner.entity_url(&self.queue, "messages")?;
        let broker_properties = serde_json::to_string(&BrokerProperties::from_envelope(envelope))?;

        let mut request = self
            .inner
            .http
            .post(url)
            .timeout(self.inner.request_timeout)
            .header(AUTHORIZATION, self.inner.authorization(&self.queue)?)
            .header(CONTENT_TYPE, envelope.content_type.as_str())
            .header(BROKER_PROPERTIES_HEADER, broker_properties)
            .body(envelope.body_text()?);

        if let Some(properties) = &envelope.application_properties {
            for (key, value) in properties {
                request = request.header(key.as_str(), serde_json::to_string(value)?);
            }
        }

        let response = request.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response, &self.queue).await);
        }

        debug!("Message accepted by Service Bus");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct ServiceBusReceiver {
    inner: Arc<ClientInner>,
    queue: String,
}

#[async_trait]
impl MessageReceiver for ServiceBusReceiver {
    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let wait_seconds = timeout.as_secs().max(1);
        let mut url = self.inner.entity_url(&self.queue, "messages/head")?;
        url.query_pairs_mut()
            .append_pair("timeout", &wait_seconds.to_string());

        let response = self
            .inner
            .http
            .delete(url)
            .timeout(self.inner.request_timeout + Duration::from_secs(wait_seconds))
            .header(AUTHORIZATION, self.inner.authorization(&self.queue)?)
            .send()
            .await
            .map_err(map_http_error)?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK | StatusCode::CREATED => {
                let headers = response.headers();
                let broker: BrokerProperties = match headers.get(BROKER_PROPERTIES_HEADER) {
                    Some(value) => serde_json::from_slice(value.as_bytes())?,
                    None => BrokerProperties::default(),
                };
                let content_type = headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let body = response.text().await.map_err(map_http_error)?;

                let mut message = ReceivedMessage::new(broker.message_id.unwrap_or_default(), body);
                message.correlation_id = broker.correlation_id;
                message.subject = broker.label;
                message.content_type = content_type;
                message.delivery_count = broker.delivery_count.unwrap_or(1);
                message.sequence_number = broker.sequence_number;
                message.enqueued_time_utc =
                    broker.enqueued_time_utc.as_deref().and_then(parse_rfc1123);

                Ok(Some(message))
            }
            _ => Err(error_from_response(response, &self.queue).await),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
