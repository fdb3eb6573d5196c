use std::time::Duration;

use thiserror::Error;

use crate::message::codes;

/// Top-level error type for the `corelink-proto` crate.
///
/// Covers every failure mode of the wire layer: socket transport, name
/// resolution, authentication, record framing, remote JSON-RPC errors,
/// and per-request timeouts. `corelink-core` maps these into user-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level I/O error (connection refused, reset, etc.)
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Host name resolution failed. Non-transient: retrying on the same
    /// endpoint cannot succeed until the configuration changes.
    #[error("cannot resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    // ── Authentication ──────────────────────────────────────────────
    /// The core rejected the logon. Non-transient until credentials change.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    // ── Framing / protocol ──────────────────────────────────────────
    /// An inbound record was not a valid JSON-RPC message. The record is
    /// dropped; the connection stays up.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An inbound record exceeded the framing limit.
    #[error("record too long: {len} bytes (max {max})")]
    RecordTooLong { len: usize, max: usize },

    // ── Request outcomes ────────────────────────────────────────────
    /// Structured error response from the remote core.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// No response arrived within the per-request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The link dropped while the request was in flight.
    #[error("link lost")]
    LinkLost,

    /// The link is not currently connected; nothing was sent.
    #[error("link not connected")]
    NotConnected,

    /// An internal channel closed unexpectedly (teardown in progress).
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns `true` for failures that reconnecting on the same
    /// configuration cannot fix (bad credentials, unresolvable host).
    /// The link enters `Faulted` and retries on an extended backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::Resolve { .. })
    }

    /// Extract the remote JSON-RPC error code, if this is a remote error.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if the remote rejected the call because the core is
    /// on standby. Routine in redundant setups, logged at low severity.
    pub fn is_standby_rejection(&self) -> bool {
        self.remote_code() == Some(codes::CORE_ON_STANDBY)
    }

    /// Returns `true` if the remote requires (re-)authentication.
    pub fn is_logon_required(&self) -> bool {
        self.remote_code() == Some(codes::LOGON_REQUIRED)
    }
}
