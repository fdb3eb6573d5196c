// ── Core error types ──
//
// User-facing errors from corelink-core. Consumers never see raw socket
// failures or framing faults directly -- the `From<corelink_proto::Error>`
// impl translates wire-layer errors into domain-appropriate variants.
// Transport and authentication failures drive reconnection internally and
// only surface through link state, never through this type.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Redundancy ───────────────────────────────────────────────────
    /// No core currently reports itself Active; mutating commands fail
    /// fast rather than queueing.
    #[error("no active core available")]
    NoActiveCore,

    // ── Session lifecycle ────────────────────────────────────────────
    #[error("session is not running")]
    NotRunning,

    #[error("session is already running")]
    AlreadyRunning,

    // ── Request outcomes ─────────────────────────────────────────────
    #[error("link lost while the command was in flight")]
    LinkLost,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Structured error from the remote core, surfaced to the caller.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    // ── Value errors ─────────────────────────────────────────────────
    #[error("unknown control: {name}")]
    UnknownControl { name: String },

    #[error("control {name} is not numeric (current value: {value})")]
    NotNumeric { name: String, value: String },

    // ── Change groups ────────────────────────────────────────────────
    #[error("unknown change group: {id}")]
    UnknownGroup { id: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<corelink_proto::Error> for CoreError {
    fn from(err: corelink_proto::Error) -> Self {
        match err {
            corelink_proto::Error::Remote { code, message } => CoreError::Remote { code, message },
            corelink_proto::Error::Timeout(deadline) => CoreError::Timeout(deadline),
            corelink_proto::Error::LinkLost => CoreError::LinkLost,
            // The routed link dropped between selection and send; to the
            // caller this is indistinguishable from having no active core.
            corelink_proto::Error::NotConnected => CoreError::NoActiveCore,
            other => CoreError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_pass_through() {
        let err: CoreError = corelink_proto::Error::Remote {
            code: corelink_proto::codes::UNKNOWN_CONTROL,
            message: "Unknown control".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Remote { code: 8, .. }));
    }

    #[test]
    fn not_connected_maps_to_no_active_core() {
        let err: CoreError = corelink_proto::Error::NotConnected.into();
        assert!(matches!(err, CoreError::NoActiveCore));
    }
}
