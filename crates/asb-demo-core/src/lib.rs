//! # ASB Demo Core
//!
//! Facade, models and transport for a small Azure Service Bus demo client that
//! sends a bounded number of test messages and receives messages for a bounded
//! time window.
//!
//! This library provides:
//! - Configuration model with validation and environment fallback
//! - Demo message model with JSON round trip
//! - Outbound envelope construction with defaulted identifiers and scheduling
//! - A queue facade that validates every call before touching the transport
//! - Azure Service Bus REST transport and an in-memory transport for tests
//!
//! ## Module Organization
//!
//! - [`error`] - Tagged error type for configuration, parameter and operation failures
//! - [`config`] - Connection configuration
//! - [`demo_message`] - Payload model used by the demo sender
//! - [`message`] - Outbound envelopes, received messages and send options
//! - [`transport`] - Transport capability traits and providers
//! - [`helper`] - The queue facade
//! - [`utility`] - Small stateless helpers

pub mod config;
pub mod demo_message;
pub mod error;
pub mod helper;
pub mod message;
pub mod transport;
pub mod utility;

// Re-export commonly used types at crate root for convenience
pub use config::{AsbConfig, CONNECTION_ENV_VAR, QUEUE_ENV_VAR};
pub use demo_message::DemoMessage;
pub use error::{AsbError, ErrorKind, TransportError};
pub use helper::{AsbHelper, MessageProcessor};
pub use message::{OutboundEnvelope, ReceiveSummary, ReceivedMessage, SendOptions, SentMessage};
pub use transport::{
    AzureServiceBusTransport, InMemoryTransport, MessageReceiver, MessageSender, QueueTransport,
    TransportClient,
};
