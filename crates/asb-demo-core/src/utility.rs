//! Stateless helper predicates and formatting.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;

#[cfg(test)]
#[path = "utility_tests.rs"]
mod tests;

/// True when the text is empty or whitespace only
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// True when the optional text is absent, empty or whitespace only
pub fn is_blank_opt(text: Option<&str>) -> bool {
    text.map_or(true, is_blank)
}

/// True when a JSON value carries no usable content.
///
/// `null` and blank strings are blank; numbers, booleans, arrays and objects
/// are not, even when empty.
pub fn is_blank_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => is_blank(s),
        _ => false,
    }
}

/// True when the value is a usable number (not NaN, not infinite)
pub fn is_number(value: f64) -> bool {
    value.is_finite()
}

/// True when `key` is present on a JSON object and is not `null`
pub fn prop_is_valid(value: &Value, key: &str) -> bool {
    value
        .as_object()
        .and_then(|o| o.get(key))
        .is_some_and(|v| !v.is_null())
}

/// Format an instant as the compact stamp used in demo message bodies
pub fn make_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Random value in `[min, max)`; returns `min` when the range is empty
pub fn dice(min: f64, max: f64) -> f64 {
    if !(is_number(min) && is_number(max)) || max <= min {
        return min;
    }

    rand::thread_rng().gen_range(min..max)
}
