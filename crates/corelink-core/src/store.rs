// ── Reactive control-value cache ──
//
// Lock-free concurrent storage with O(1) lookups, a whole-cache snapshot
// watch channel, and a per-delta broadcast channel. The sole writer is the
// session event loop's poll-ingestion path; readers never block it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::model::{ControlState, ControlValue};

const DELTA_CHANNEL_CAPACITY: usize = 1024;

/// Last-writer-wins mapping from control name to last-known state.
///
/// Mutations arrive only through [`apply_delta`](Self::apply_delta);
/// identical deltas are suppressed so subscribers see each change once,
/// unless the caller forces emission (post-invalidate resynchronization).
pub struct ControlCache {
    by_name: DashMap<String, Arc<ControlState>>,

    /// Full snapshot, rebuilt on mutation, sorted by name.
    snapshot: watch::Sender<Arc<Vec<Arc<ControlState>>>>,

    /// Per-change fan-out. Slow subscribers observe `Lagged`.
    deltas: broadcast::Sender<Arc<ControlState>>,
}

impl ControlCache {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (deltas, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);

        Self { by_name: DashMap::new(), snapshot, deltas }
    }

    /// Look up the last-known state of one control.
    pub fn get(&self, name: &str) -> Option<Arc<ControlState>> {
        self.by_name.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot of every mirrored control (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<ControlState>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<Vec<Arc<ControlState>>>> {
        self.snapshot.subscribe()
    }

    /// Subscribe to individual value changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ControlState>> {
        self.deltas.subscribe()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Apply one delta from poll ingestion. Returns `true` when a change
    /// notification was emitted.
    ///
    /// An identical delta leaves the entry untouched and emits nothing --
    /// unless `force` is set, which emits unconditionally so consumers can
    /// resynchronize after an invalidate.
    pub(crate) fn apply_delta(
        &self,
        name: &str,
        value: ControlValue,
        string: Option<String>,
        position: Option<f64>,
        force: bool,
    ) -> bool {
        let string = string.unwrap_or_else(|| value.to_string());

        let unchanged = self.by_name.get(name).is_some_and(|existing| {
            existing.value == value && existing.string == string && existing.position == position
        });
        if unchanged && !force {
            trace!(control = name, "delta suppressed (unchanged)");
            return false;
        }

        let state = Arc::new(ControlState {
            name: name.to_owned(),
            value,
            string,
            position,
            last_updated: Utc::now(),
        });
        self.by_name.insert(name.to_owned(), Arc::clone(&state));
        self.rebuild_snapshot();

        // Ignore send errors -- just means no active subscribers right now.
        let _ = self.deltas.send(state);
        true
    }

    /// Drop every entry. Only called at full session teardown.
    pub(crate) fn reset(&self) {
        self.by_name.clear();
        self.rebuild_snapshot();
    }

    /// Collect all values into a name-sorted snapshot and broadcast it.
    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<ControlState>> =
            self.by_name.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.name.cmp(&b.name));
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for ControlCache {
    fn default() -> Self {
        Self::new()
    }
}
