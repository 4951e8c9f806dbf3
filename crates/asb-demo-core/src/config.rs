//! Connection configuration for the demo client.

use crate::utility;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable consulted for the connection string when the file is unusable
pub const CONNECTION_ENV_VAR: &str = "AsbDemoConnection";

/// Environment variable consulted for the queue name when the file is unusable
pub const QUEUE_ENV_VAR: &str = "AsbDemoQueue";

/// Service Bus connection settings.
///
/// Valid when both the connection string and the queue name are non-blank.
/// Missing or `null` fields deserialize to their empty defaults so an incomplete
/// document still produces a (invalid) config rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsbConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub connection_string: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub queue: String,

    /// When set, validation and envelope construction run but nothing is sent
    #[serde(default, deserialize_with = "null_as_default")]
    pub dry_run: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl AsbConfig {
    pub fn new(connection_string: impl Into<String>, queue: impl Into<String>, dry_run: bool) -> Self {
        Self {
            connection_string: connection_string.into(),
            queue: queue.into(),
            dry_run,
        }
    }

    /// Parse a configuration document
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Build from an already-parsed JSON object; `None` for `null` or non-objects
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }

        serde_json::from_value(value.clone()).ok()
    }

    /// True if this config has the required fields
    pub fn is_valid(&self) -> bool {
        !utility::is_blank(&self.connection_string) && !utility::is_blank(&self.queue)
    }

    /// Replace connection string and queue with values from `lookup`.
    ///
    /// Both fields are overwritten; a variable that is not set leaves the field empty.
    pub fn apply_environment<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.connection_string = lookup(CONNECTION_ENV_VAR).unwrap_or_default();
        self.queue = lookup(QUEUE_ENV_VAR).unwrap_or_default();
    }

    /// Same as [`AsbConfig::apply_environment`] using the process environment
    pub fn apply_process_environment(&mut self) {
        self.apply_environment(|key| std::env::var(key).ok());
    }
}

/// Semicolon separated list of fields, for debugging
impl fmt::Display for AsbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{};", self.connection_string, self.queue, self.dry_run)
    }
}
