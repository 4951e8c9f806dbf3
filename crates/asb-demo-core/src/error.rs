//! Error types for facade and transport operations.

use thiserror::Error;

/// Discriminant for [`AsbError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Param,
    Operation,
}

/// Failure raised by the queue facade.
///
/// Validation and transport failures are both reported through this type; there
/// is no retry or partial recovery behind it.
#[derive(Debug, Error)]
pub enum AsbError {
    #[error("Configuration error ({name}): {message}")]
    Config { name: String, message: String },

    #[error("Parameter error ({name}): {message}")]
    Param { name: String, message: String },

    #[error("Operation error: {message}: {source}")]
    Operation {
        #[source]
        source: TransportError,
        message: String,
    },
}

impl AsbError {
    /// Missing or invalid configuration field
    pub fn config(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Invalid call parameter
    pub fn param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Param {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Transport failure with guidance for the caller
    pub fn operation(source: TransportError, message: impl Into<String>) -> Self {
        Self::Operation {
            source,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Param { .. } => ErrorKind::Param,
            Self::Operation { .. } => ErrorKind::Operation,
        }
    }

    /// Discriminator name, stable across releases
    pub fn name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "ConfigError",
            Self::Param { .. } => "ParamError",
            Self::Operation { .. } => "OperationError",
        }
    }

    /// Offending configuration field or parameter, if the error names one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Config { name, .. } | Self::Param { name, .. } => Some(name),
            Self::Operation { .. } => None,
        }
    }

    /// Human guidance attached to the error
    pub fn message(&self) -> &str {
        match self {
            Self::Config { message, .. }
            | Self::Param { message, .. }
            | Self::Operation { message, .. } => message,
        }
    }

    /// Wrapped transport failure for operation errors
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors reported by a queue transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid connection string: {message}")]
    InvalidConnectionString { message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Service Bus error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Map a non-success HTTP status to a transport error
    pub fn from_status(status: u16, queue: &str, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication(body),
            404 => Self::QueueNotFound(queue.to_string()),
            _ => Self::Service {
                status,
                message: body,
            },
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
