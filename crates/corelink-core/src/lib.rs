//! Session layer between `corelink-proto` and consumers (CLI, embedders).
//!
//! This crate owns all cross-link state for a control session against one
//! or two redundant cores:
//!
//! - **[`Session`]** — Central facade with an explicit lifecycle:
//!   [`start()`](Session::start) spawns one transport link per configured
//!   core plus a single owning event loop, [`stop()`](Session::stop) tears
//!   everything down, [`reconfigure()`](Session::reconfigure) does both.
//!
//! - **Redundancy coordination** ([`redundancy`]) — The selection state
//!   machine deciding which link, if any, may receive mutating commands.
//!   Driven only by engine-status reports; the split-brain tie-break is
//!   most-recent-Active-report-wins.
//!
//! - **Change groups** ([`group`]) — Local membership as the source of
//!   truth, mirrored to every connected link and replayed on reconnect;
//!   polled on the Active link at the configured interval.
//!
//! - **[`ControlCache`]** — Lock-free value mirror (`DashMap` + `watch`
//!   snapshots + per-delta `broadcast`), written only by poll ingestion,
//!   readable by everything.
//!
//! - **[`Command`]** — Typed operations routed through an `mpsc` channel
//!   to the event loop; each RPC-backed variant formats its remote method
//!   and parameters verbatim per the external protocol contract.

pub mod command;
pub mod config;
pub mod error;
pub mod group;
pub mod model;
pub mod redundancy;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandReply, ComponentValue};
pub use config::{MAX_POLL_INTERVAL, MIN_POLL_INTERVAL, SessionConfig};
pub use error::CoreError;
pub use group::DEFAULT_GROUP;
pub use model::{ControlState, ControlValue, ValueError};
pub use redundancy::{Selection, Topology};
pub use session::Session;
pub use store::ControlCache;
pub use stream::{ChangeStream, SnapshotStream};

// Re-export the wire-level types consumers are expected to touch.
pub use corelink_proto::{
    CoreEndpoint, Credentials, DEFAULT_PORT, EngineState, EngineStatus, LinkId, LinkState,
};
