// ── Runtime session configuration ──
//
// These types describe *how* to reach the configured cores. They carry
// credential data and timing knobs, but never touch disk. The CLI builds a
// `SessionConfig` from its profile layer and hands it in.

use std::time::Duration;

use corelink_proto::{CoreEndpoint, Credentials, LinkConfig};

use crate::redundancy::Topology;

/// Lower bound on the change-group poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(30);
/// Upper bound on the change-group poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(60_000);

/// Configuration for one control session.
///
/// Immutable once the session starts; `reconfigure` tears down and
/// rebuilds all links.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The primary core.
    pub primary: CoreEndpoint,
    /// The backup core of a redundant pair, if any.
    pub secondary: Option<CoreEndpoint>,
    /// Logon credentials, shared by both cores of a pair.
    pub credentials: Option<Credentials>,
    /// Change-group poll cadence (clamped to 30 ms – 60 s). Engine-status
    /// polls run at the same interval.
    pub poll_interval: Duration,
    /// Per-request response deadline.
    pub request_timeout: Duration,
    /// Control names mirrored into the default change group at start.
    pub monitored_controls: Vec<String>,
}

impl SessionConfig {
    pub fn new(primary: CoreEndpoint) -> Self {
        Self { primary, ..Self::default() }
    }

    /// Poll interval with the protocol bounds applied.
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }

    pub(crate) fn topology(&self) -> Topology {
        if self.secondary.is_some() { Topology::Redundant } else { Topology::Single }
    }

    pub(crate) fn link_config(&self) -> LinkConfig {
        LinkConfig {
            request_timeout: self.request_timeout,
            ..LinkConfig::from_poll_interval(self.effective_poll_interval())
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            primary: CoreEndpoint::new("127.0.0.1", corelink_proto::DEFAULT_PORT),
            secondary: None,
            credentials: None,
            poll_interval: Duration::from_millis(350),
            request_timeout: Duration::from_secs(5),
            monitored_controls: Vec::new(),
        }
    }
}
