//! Wire layer for the corelink control protocol.
//!
//! Cores speak CR-delimited JSON-RPC 2.0 over TCP. This crate owns
//! everything that touches bytes:
//!
//! - **[`codec`]** — `tokio_util` codec framing records on `\r`.
//! - **[`message`]** — JSON-RPC envelopes, remote error codes, and the
//!   engine-status / poll-result wire models.
//! - **[`correlator`]** — per-link pending-request table matching
//!   responses to requests by id.
//! - **[`link`]** — the transport link: one reconnecting TCP session per
//!   core, with the logon gate, keepalive, and state publication.
//!
//! Cross-link policy (which core may receive a mutating command, change
//! group bookkeeping, the value cache) lives in `corelink-core`.

pub mod codec;
pub mod correlator;
pub mod error;
pub mod link;
pub mod message;

pub use error::Error;
pub use link::{
    CoreEndpoint, Credentials, DEFAULT_PORT, Link, LinkConfig, LinkEvent, LinkId, LinkState,
};
pub use message::{
    ChangeEntry, EngineState, EngineStatus, Message, PollResult, Request, RpcError, codes,
};
