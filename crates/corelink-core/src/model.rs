// ── Domain model ──
//
// The tagged control-value type and the cache entry built around it.
// Wire text arrives stringly-typed; conversions to a concrete target type
// are total and return a typed failure instead of a silently wrong value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conversion failure for a [`ControlValue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("value `{value}` is not numeric")]
    NotNumeric { value: String },

    #[error("value `{value}` is not a boolean")]
    NotBoolean { value: String },
}

/// A control value as mirrored from the core.
///
/// `#[serde(untagged)]` matches the wire encoding: JSON booleans, numbers,
/// and strings map onto the three variants directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ControlValue {
    /// Build from a raw wire value. Shapes outside the three scalar kinds
    /// (arrays, objects) degrade to their JSON text rather than being lost.
    pub fn from_wire(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Null => Self::Text(String::new()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Numeric reading. Booleans coerce to 0/1; text parses if it holds a
    /// number.
    pub fn as_f64(&self) -> Result<f64, ValueError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(f64::from(u8::from(*b))),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::NotNumeric { value: s.clone() }),
        }
    }

    /// Boolean reading. Numbers coerce (non-zero is true); text accepts
    /// the usual spellings.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(ValueError::NotBoolean { value: s.clone() }),
            },
        }
    }
}

impl std::fmt::Display for ControlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One cache entry: the last-known state of a named control.
///
/// Entries are created lazily on first observation, overwritten in place,
/// and removed only at full session reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    /// Control name; component controls use `Component.Name`.
    pub name: String,
    /// Typed value.
    pub value: ControlValue,
    /// Display string as rendered by the core (falls back to the value's
    /// own rendering when the core sent none).
    pub string: String,
    /// Normalized 0..1 fader position, when the core supplies one.
    pub position: Option<f64>,
    /// When this entry last changed.
    pub last_updated: DateTime<Utc>,
}
