//! Queue transport capability and its providers.
//!
//! The facade never talks to a wire protocol directly. It acquires a client
//! identified by the caller, derives a sender or receiver bound to one queue,
//! uses it once and closes both again. Providers implement the four traits
//! below:
//!
//! - [`QueueTransport`] opens clients from a connection string
//! - [`TransportClient`] creates senders and receivers for a queue
//! - [`MessageSender`] transmits envelopes
//! - [`MessageReceiver`] pulls messages with a bounded wait

use crate::error::TransportError;
use crate::message::{OutboundEnvelope, ReceivedMessage};
use async_trait::async_trait;
use std::time::Duration;

pub mod azure;
pub mod memory;

pub use azure::AzureServiceBusTransport;
pub use memory::InMemoryTransport;

/// Entry point of a provider
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Open a client; `identifier` tags every request the client makes
    async fn connect(
        &self,
        connection_string: &str,
        identifier: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError>;
}

/// A connection-scoped client
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Create a sender bound to `queue`
    async fn create_sender(&self, queue: &str) -> Result<Box<dyn MessageSender>, TransportError>;

    /// Create a receiver bound to `queue`
    async fn create_receiver(&self, queue: &str)
        -> Result<Box<dyn MessageReceiver>, TransportError>;

    /// Release the client
    async fn close(&self) -> Result<(), TransportError>;

    fn identifier(&self) -> &str;
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, envelope: &OutboundEnvelope) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Wait up to `timeout` for the next message; `None` when none arrived
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
