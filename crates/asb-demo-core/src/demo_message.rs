//! Payload model produced by the demo sender.

use crate::utility;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[cfg(test)]
#[path = "demo_message_tests.rs"]
mod tests;

/// A demo payload: what kind of work it represents, a free-form message and a
/// retry counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoMessage {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub retries: u32,
}

impl DemoMessage {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_retries(kind, message, 0)
    }

    pub fn with_retries(kind: impl Into<String>, message: impl Into<String>, retries: u32) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            retries,
        }
    }

    /// Parse from JSON text; `None` when the text is not a JSON object
    pub fn from_json(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_value(&value)
    }

    /// Build from a JSON object, tolerating missing fields.
    ///
    /// Absent `kind`/`message` become empty (and the result invalid); an absent,
    /// `null` or non-integer `retries` becomes 0.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let retries = if utility::prop_is_valid(value, "retries") {
            object
                .get("retries")
                .and_then(Value::as_u64)
                .and_then(|r| u32::try_from(r).ok())
                .unwrap_or(0)
        } else {
            0
        };

        Some(Self::with_retries(text("kind"), text("message"), retries))
    }

    /// True if kind and message are both present
    pub fn is_valid(&self) -> bool {
        !utility::is_blank(&self.kind) && !utility::is_blank(&self.message)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Semicolon separated list of fields, for debugging
impl fmt::Display for DemoMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.kind, self.message, self.retries)
    }
}
