// ── Request/response correlation ──
//
// One instance per link. Ids are a monotonic counter, unique for the life
// of the link but not across links. Every pending entry resolves exactly
// once: entries are removed from the table before their sink is fired, so
// a response racing a disconnect cannot double-resolve.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Error;

type Outcome = Result<serde_json::Value, Error>;

struct Pending {
    sink: oneshot::Sender<Outcome>,
    issued_at: Instant,
}

/// Pending-request table for a single link.
#[derive(Default)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
}

fn lock<'a>(
    pending: &'a Mutex<HashMap<u64, Pending>>,
) -> std::sync::MutexGuard<'a, HashMap<u64, Pending>> {
    pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and register its result sink.
    ///
    /// The caller must either await the receiver or accept that the entry
    /// lives until a response or disconnect removes it.
    pub fn register(&self) -> (u64, oneshot::Receiver<Outcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sink, rx) = oneshot::channel();
        lock(&self.pending).insert(id, Pending { sink, issued_at: Instant::now() });
        (id, rx)
    }

    /// Resolve a pending request. Returns `false` when the id is unknown
    /// (already timed out, already resolved, or never ours).
    pub fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let Some(entry) = lock(&self.pending).remove(&id) else {
            debug!(id, "response for unknown request id");
            return false;
        };
        debug!(id, elapsed_ms = entry.issued_at.elapsed().as_millis() as u64, "request resolved");
        // A dropped receiver (caller timed out or gave up) is not an error.
        let _ = entry.sink.send(outcome);
        true
    }

    /// Drop a pending entry without resolving it (caller-side timeout).
    /// The id is never reused.
    pub fn discard(&self, id: u64) -> bool {
        lock(&self.pending).remove(&id).is_some()
    }

    /// Fail every pending request, exactly once each. Called on disconnect
    /// so callers see a link-lost error instead of waiting out timeouts.
    pub fn fail_all(&self, err: impl Fn() -> Error) {
        let drained: Vec<Pending> = {
            let mut pending = lock(&self.pending);
            pending.drain().map(|(_, entry)| entry).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests");
        }
        for entry in drained {
            let _ = entry.sink.send(Err(err()));
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}
