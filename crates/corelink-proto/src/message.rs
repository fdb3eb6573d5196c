// ── JSON-RPC envelopes and wire models ──
//
// Everything the core sends or receives is one of three shapes: a request
// (ours, always carrying an id), a response or error (matched back to a
// request by id), or an id-less notification pushed by the core.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Remote error codes fixed by the control protocol contract.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_ERROR: i64 = -32603;
    pub const INVALID_PAGE_REQUEST_ID: i64 = 2;
    pub const BAD_PAGE_REQUEST: i64 = 3;
    pub const MISSING_FILE: i64 = 4;
    pub const CHANGE_GROUPS_EXHAUSTED: i64 = 5;
    pub const UNKNOWN_CHANGE_GROUP: i64 = 6;
    pub const UNKNOWN_COMPONENT: i64 = 7;
    pub const UNKNOWN_CONTROL: i64 = 8;
    pub const ILLEGAL_MIXER_CHANNEL: i64 = 9;
    pub const LOGON_REQUIRED: i64 = 10;
    pub const CORE_ON_STANDBY: i64 = 11;
}

// ── Outbound ─────────────────────────────────────────────────────────

/// An outbound JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// A structured JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Successful response to one of our requests.
    Response { id: u64, result: Value },
    /// Error response. `id` is absent when the core could not even parse
    /// the request it is complaining about.
    Error { id: Option<u64>, error: RpcError },
    /// Unsolicited push from the core (e.g. `EngineStatus`).
    Notification { method: String, params: Value },
}

/// Loose envelope used only for classification; the strictness lives in
/// [`parse`], which rejects shapes that are none of the three kinds.
#[derive(Debug, Deserialize)]
struct Envelope {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcError>,
    method: Option<String>,
    params: Option<Value>,
}

/// Parse one CR-delimited record into a [`Message`].
///
/// A record that is not valid JSON, or is valid JSON but not a recognizable
/// JSON-RPC shape, yields [`Error::Protocol`]. Callers log and drop such
/// records without tearing down the connection.
pub fn parse(record: &str) -> Result<Message, Error> {
    let envelope: Envelope =
        serde_json::from_str(record).map_err(|e| Error::Protocol(e.to_string()))?;

    if let Some(error) = envelope.error {
        return Ok(Message::Error { id: envelope.id, error });
    }
    if let (Some(id), Some(result)) = (envelope.id, envelope.result) {
        return Ok(Message::Response { id, result });
    }
    if let Some(method) = envelope.method {
        return Ok(Message::Notification {
            method,
            params: envelope.params.unwrap_or(Value::Null),
        });
    }
    Err(Error::Protocol("record carries no result, error, or method".into()))
}

// ── Engine status ────────────────────────────────────────────────────

/// Redundancy role a core reports for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// Running the design and accepting mutating commands.
    Active,
    /// Hot spare in a redundant pair; rejects mutating commands.
    Standby,
    /// No design running.
    Idle,
    /// Not yet reported, or an unrecognized value.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Standby => write!(f, "Standby"),
            Self::Idle => write!(f, "Idle"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Engine status as reported by `StatusGet` responses and unsolicited
/// `EngineStatus` notifications. Both carry the same field set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EngineStatus {
    pub state: EngineState,
    pub design_name: String,
    pub design_code: String,
    pub is_redundant: bool,
    pub is_emulator: bool,
}

// ── Change-group poll payloads ───────────────────────────────────────

/// One control delta inside a poll response or a `Control.Get` result.
///
/// `component` is set for component-control members; `error` is set when
/// the core could not resolve this member (the member stays in the group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChangeEntry {
    /// The cache key: `Component.Name` for component controls, `Name` alone
    /// for named controls.
    pub fn key(&self) -> String {
        match &self.component {
            Some(component) => format!("{component}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Result payload of `ChangeGroup.Poll`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PollResult {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
}
