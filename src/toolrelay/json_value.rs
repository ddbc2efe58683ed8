//! Dynamic JSON helpers used wherever payloads are heterogeneous.
//!
//! Provider schemas differ per call and tool arguments are opaque blobs, so the wire layer
//! works on [`serde_json::Value`] rather than typed structs. This module adds the pieces the
//! adapters need on top of it:
//!
//! * [`parse`] / [`to_text`] with a caller-chosen indent width,
//! * lenient coercions through [`JsonExt`] that degrade to the type default instead of failing.
//!
//! Indexing a [`Value`] with a missing key or out-of-range position already yields a shared
//! `Null` sentinel, so lookups chain without checks:
//!
//! ```rust
//! use toolrelay::json_value::{parse, JsonExt};
//!
//! let root = parse(r#"{"usage": {"input_tokens": "12"}}"#).unwrap();
//! assert_eq!(root["usage"]["input_tokens"].as_int_lossy(), 12);
//! assert_eq!(root["usage"]["missing"]["deeper"].as_int_lossy(), 0);
//! assert!(!root["choices"][0].is_present());
//! ```

use crate::error::ChatError;
use serde::Serialize;
use serde_json::Value;

/// Parse a complete JSON document. Malformed input is a hard failure; nothing is recovered.
pub fn parse(text: &str) -> Result<Value, ChatError> {
    serde_json::from_str(text).map_err(ChatError::from)
}

/// Serialize a value. `None` produces compact text, `Some(n)` indents nested levels by `n`
/// spaces.
pub fn to_text(value: &Value, indent: Option<usize>) -> String {
    match indent {
        None => value.to_string(),
        Some(width) => {
            let indent = " ".repeat(width);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
            let mut buf = Vec::new();
            let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
            if value.serialize(&mut serializer).is_err() {
                return value.to_string();
            }
            String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
        }
    }
}

/// Lenient accessors over [`Value`].
pub trait JsonExt {
    /// Integer view. Numbers are truncated, numeric strings are parsed, booleans map to 1/0.
    fn as_int_lossy(&self) -> i64;
    /// Float view with the same rules as [`JsonExt::as_int_lossy`].
    fn as_float_lossy(&self) -> f64;
    /// `true`, `"true"`, `"1"` and non-zero numbers are truthy.
    fn as_bool_lossy(&self) -> bool;
    /// Strings come back verbatim, `null` becomes `""`, everything else is compact JSON text.
    fn as_string_lossy(&self) -> String;
    /// Whether the value is anything other than `null`.
    fn is_present(&self) -> bool;
    /// The value as a string slice when it is a non-empty string.
    fn non_empty_str(&self) -> Option<&str>;
}

impl JsonExt for Value {
    fn as_int_lossy(&self) -> i64 {
        match self {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                    .unwrap_or(0)
            }
            Value::Bool(b) => i64::from(*b),
            _ => 0,
        }
    }

    fn as_float_lossy(&self) -> f64 {
        match self {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Value::Bool(true) => 1.0,
            _ => 0.0,
        }
    }

    fn as_bool_lossy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    }

    fn as_string_lossy(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn is_present(&self) -> bool {
        !self.is_null()
    }

    fn non_empty_str(&self) -> Option<&str> {
        self.as_str().filter(|s| !s.is_empty())
    }
}
