//! In-memory transport for tests and local runs.
//!
//! Sent envelopes are recorded and also become receivable on the same queue
//! once their scheduled enqueue time has passed. The transport keeps counters
//! of every client, sender and receiver it hands out and closes, so callers can
//! assert that resources are released on every path.

use crate::error::TransportError;
use crate::message::{OutboundEnvelope, ReceivedMessage};
use crate::transport::{MessageReceiver, MessageSender, QueueTransport, TransportClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Idle wait used when a queue is empty, capped by the caller's timeout
const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Acquire/release counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub clients_opened: usize,
    pub clients_closed: usize,
    pub senders_opened: usize,
    pub senders_closed: usize,
    pub receivers_opened: usize,
    pub receivers_closed: usize,
}

impl ResourceCounts {
    /// True when everything handed out has been closed again
    pub fn all_released(&self) -> bool {
        self.clients_opened == self.clients_closed
            && self.senders_opened == self.senders_closed
            && self.receivers_opened == self.receivers_closed
    }
}

/// An envelope recorded by the transport
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub queue: String,
    pub identifier: String,
    pub envelope: OutboundEnvelope,
}

struct StoredMessage {
    message: ReceivedMessage,
    available_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    sent: Vec<SentRecord>,
    counts: ResourceCounts,
    connections: Vec<(String, String)>,
    fail_sends: bool,
    fail_connect: bool,
}

/// Cloneable handle to shared in-memory queues
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put a message on `queue`, available immediately
    pub fn enqueue(&self, queue: &str, message: ReceivedMessage) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                message,
                available_at: Utc::now(),
            });
    }

    /// Make every subsequent send fail with a network error
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Make every subsequent connect fail with a network error
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Envelopes sent so far, in order
    pub fn sent(&self) -> Vec<SentRecord> {
        self.lock().sent.clone()
    }

    /// `(connection string, identifier)` of every connect call, in order
    pub fn connections(&self) -> Vec<(String, String)> {
        self.lock().connections.clone()
    }

    pub fn counts(&self) -> ResourceCounts {
        self.lock().counts
    }

    /// Messages waiting on `queue`, including ones scheduled for later
    pub fn pending(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    fn take_available(&self, queue: &str) -> Option<ReceivedMessage> {
        let mut state = self.lock();
        let messages = state.queues.get_mut(queue)?;
        let now = Utc::now();
        let index = messages.iter().position(|m| m.available_at <= now)?;
        messages.remove(index).map(|stored| stored.message)
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn connect(
        &self,
        connection_string: &str,
        identifier: &str,
    ) -> Result<Box<dyn TransportClient>, TransportError> {
        let mut state = self.lock();
        state
            .connections
            .push((connection_string.to_string(), identifier.to_string()));

        if state.fail_connect {
            return Err(TransportError::Network("simulated connect failure".to_string()));
        }

        state.counts.clients_opened += 1;
        Ok(Box::new(InMemoryClient {
            transport: self.clone(),
            identifier: identifier.to_string(),
        }))
    }
}

struct InMemoryClient {
    transport: InMemoryTransport,
    identifier: String,
}

#[async_trait]
impl TransportClient for InMemoryClient {
    async fn create_sender(&self, queue: &str) -> Result<Box<dyn MessageSender>, TransportError> {
        self.transport.lock().counts.senders_opened += 1;
        Ok(Box::new(InMemorySender {
            transport: self.transport.clone(),
            identifier: self.identifier.clone(),
            queue: queue.to_string(),
        }))
    }

    async fn create_receiver(
        &self,
        queue: &str,
    ) -> Result<Box<dyn MessageReceiver>, TransportError> {
        self.transport.lock().counts.receivers_opened += 1;
        Ok(Box::new(InMemoryReceiver {
            transport: self.transport.clone(),
            queue: queue.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.transport.lock().counts.clients_closed += 1;
        Ok(())
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

struct InMemorySender {
    transport: InMemoryTransport,
    identifier: String,
    queue: String,
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send_message(&self, envelope: &OutboundEnvelope) -> Result<(), TransportError> {
        let received = ReceivedMessage::from_envelope(envelope)?;

        let mut state = self.transport.lock();
        if state.fail_sends {
            return Err(TransportError::Network("simulated send failure".to_string()));
        }

        state.sent.push(SentRecord {
            queue: self.queue.clone(),
            identifier: self.identifier.clone(),
            envelope: envelope.clone(),
        });

        let available_at = envelope.scheduled_enqueue_time_utc.unwrap_or_else(Utc::now);
        state
            .queues
            .entry(self.queue.clone())
            .or_default()
            .push_back(StoredMessage {
                message: received,
                available_at,
            });

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.transport.lock().counts.senders_closed += 1;
        Ok(())
    }
}

struct InMemoryReceiver {
    transport: InMemoryTransport,
    queue: String,
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn receive_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(message) = self.transport.take_available(&self.queue) {
                return Ok(Some(message));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            tokio::time::sleep(EMPTY_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.transport.lock().counts.receivers_closed += 1;
        Ok(())
    }
}
