//! Session facade and owning event loop.
//!
//! A [`Session`] is the explicit object replacing ambient connection
//! globals: `start()` spawns one link per configured core plus a single
//! event-loop task, `stop()` tears everything down, `reconfigure()` does
//! both. Every piece of cross-link state -- engine status, selection,
//! change-group membership, cache writes -- is applied only on the event
//! loop, fed by one queue of link events, one queue of internal results,
//! and one queue of commands. The value cache is the only state read from
//! outside that task.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use corelink_proto::{ChangeEntry, EngineStatus, Link, LinkEvent, LinkId, LinkState, PollResult};

use crate::command::{Command, CommandEnvelope, CommandReply};
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::group::{self, ChangeGroups, DEFAULT_GROUP};
use crate::model::{ControlState, ControlValue};
use crate::redundancy::{Coordinator, Selection};
use crate::store::ControlCache;

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 256;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Session ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Owns the value cache for its whole
/// lifetime and the links/event loop for the lifetime of one run.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: StdMutex<SessionConfig>,
    cache: Arc<ControlCache>,
    selection_tx: watch::Sender<Selection>,
    command_tx: StdMutex<Option<mpsc::Sender<CommandEnvelope>>>,
    links: StdMutex<Vec<Link>>,
    /// Parent token; per-run child tokens hang off it so `stop` does not
    /// poison future runs.
    cancel: CancellationToken,
    run: tokio::sync::Mutex<Option<Run>>,
}

struct Run {
    cancel: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl Session {
    /// Create a session from configuration. Does NOT connect -- call
    /// [`start()`](Self::start) to spawn the links and the event loop.
    pub fn new(config: SessionConfig) -> Self {
        let (selection_tx, _) = watch::channel(Selection::None);
        Self {
            inner: Arc::new(SessionInner {
                config: StdMutex::new(config),
                cache: Arc::new(ControlCache::new()),
                selection_tx,
                command_tx: StdMutex::new(None),
                links: StdMutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Current configuration (a clone; mutate via `reconfigure`).
    pub fn config(&self) -> SessionConfig {
        lock(&self.inner.config).clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn one link per configured core and the owning event loop.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        let config = self.config();
        let cancel = self.inner.cancel.child_token();

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (internal_tx, internal_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        let link_config = config.link_config();
        let mut links = vec![Link::spawn(
            LinkId::Primary,
            config.primary.clone(),
            config.credentials.clone(),
            link_config.clone(),
            events_tx.clone(),
            cancel.clone(),
        )];
        if let Some(secondary) = config.secondary.clone() {
            links.push(Link::spawn(
                LinkId::Secondary,
                secondary,
                config.credentials.clone(),
                link_config,
                events_tx,
                cancel.clone(),
            ));
        }

        let mut groups = ChangeGroups::new();
        if !config.monitored_controls.is_empty() {
            groups.add_controls(DEFAULT_GROUP, &config.monitored_controls);
        }

        let event_loop = tokio::spawn(event_loop(EventLoop {
            cache: Arc::clone(&self.inner.cache),
            selection_tx: self.inner.selection_tx.clone(),
            coordinator: Coordinator::new(config.topology()),
            groups,
            links: links.clone(),
            poll_interval: config.effective_poll_interval(),
            events_rx,
            internal_rx,
            internal_tx,
            command_rx,
            cancel: cancel.clone(),
        }));

        *lock(&self.inner.links) = links;
        *lock(&self.inner.command_tx) = Some(command_tx);
        *run = Some(Run { cancel, event_loop });

        info!(primary = %config.primary, redundant = config.secondary.is_some(), "session started");
        Ok(())
    }

    /// Tear down both links, all timers, and drop the value cache.
    /// Pending requests on each link fail with a link-lost error.
    pub async fn stop(&self) {
        let mut run = self.inner.run.lock().await;
        let Some(run_state) = run.take() else { return };

        run_state.cancel.cancel();
        *lock(&self.inner.command_tx) = None;
        let _ = run_state.event_loop.await;

        lock(&self.inner.links).clear();
        self.inner.cache.reset();
        self.inner.selection_tx.send_replace(Selection::None);
        debug!("session stopped");
    }

    /// Full reconfiguration: tears down and rebuilds all links.
    pub async fn reconfigure(&self, config: SessionConfig) -> Result<(), CoreError> {
        self.stop().await;
        *lock(&self.inner.config) = config;
        self.start().await
    }

    // ── Command execution ────────────────────────────────────────────

    /// Submit a command to the event loop and await its result.
    ///
    /// Mutating commands route only to the currently Active core and fail
    /// fast with [`CoreError::NoActiveCore`] when there is none.
    pub async fn execute(&self, command: Command) -> Result<CommandReply, CoreError> {
        let tx = lock(&self.inner.command_tx).clone().ok_or(CoreError::NotRunning)?;
        let (response_tx, response_rx) = oneshot::channel();
        tx.send(CommandEnvelope { command, response_tx })
            .await
            .map_err(|_| CoreError::NotRunning)?;
        response_rx
            .await
            .map_err(|_| CoreError::Internal("command reply dropped".into()))?
    }

    /// Set a named control, optionally ramping over `ramp` seconds.
    pub async fn set_control(
        &self,
        name: impl Into<String>,
        value: ControlValue,
        ramp: Option<f64>,
    ) -> Result<(), CoreError> {
        self.execute(Command::SetControl { name: name.into(), value, ramp }).await.map(|_| ())
    }

    /// Adjust a numeric control relative to its cached value.
    pub async fn adjust_control(
        &self,
        name: impl Into<String>,
        delta: f64,
        ramp: Option<f64>,
    ) -> Result<(), CoreError> {
        self.execute(Command::AdjustControl { name: name.into(), delta, ramp }).await.map(|_| ())
    }

    /// Fetch controls explicitly; results are ingested into the cache.
    pub async fn get_controls(&self, names: Vec<String>) -> Result<Vec<ControlState>, CoreError> {
        match self.execute(Command::GetControls { names }).await? {
            CommandReply::Values(values) => Ok(values),
            other => Err(CoreError::Internal(format!("unexpected reply: {other:?}"))),
        }
    }

    /// Engine status of every configured core, as currently known.
    pub async fn status(&self) -> Result<(EngineStatus, Option<EngineStatus>), CoreError> {
        match self.execute(Command::Status).await? {
            CommandReply::Status { primary, secondary } => Ok((primary, secondary)),
            other => Err(CoreError::Internal(format!("unexpected reply: {other:?}"))),
        }
    }

    // ── State observation ────────────────────────────────────────────

    /// Last-known state of one control.
    pub fn control(&self, name: &str) -> Option<Arc<ControlState>> {
        self.inner.cache.get(name)
    }

    /// Snapshot of every mirrored control.
    pub fn controls(&self) -> Arc<Vec<Arc<ControlState>>> {
        self.inner.cache.snapshot()
    }

    /// Watch whole-cache snapshot changes.
    pub fn watch_controls(&self) -> watch::Receiver<Arc<Vec<Arc<ControlState>>>> {
        self.inner.cache.watch_snapshot()
    }

    /// Subscribe to individual control-value changes.
    pub fn subscribe_changes(&self) -> tokio::sync::broadcast::Receiver<Arc<ControlState>> {
        self.inner.cache.subscribe()
    }

    /// Individual control changes as a `Stream`.
    pub fn change_stream(&self) -> crate::stream::ChangeStream {
        crate::stream::ChangeStream::new(self.inner.cache.subscribe())
    }

    /// Whole-cache snapshots as a `Stream`.
    pub fn snapshot_stream(&self) -> crate::stream::SnapshotStream {
        crate::stream::SnapshotStream::new(self.inner.cache.watch_snapshot())
    }

    /// Which core, if any, currently accepts mutating commands.
    pub fn selection(&self) -> Selection {
        *self.inner.selection_tx.borrow()
    }

    /// Watch selection changes.
    pub fn selection_stream(&self) -> watch::Receiver<Selection> {
        self.inner.selection_tx.subscribe()
    }

    /// Connection state of each running link.
    pub fn link_states(&self) -> Vec<(LinkId, LinkState)> {
        lock(&self.inner.links).iter().map(|l| (l.id(), l.state())).collect()
    }
}

// ── Event loop ───────────────────────────────────────────────────────

/// Results produced off-loop (poll responses, status responses) and fed
/// back to the owning task for ingestion.
enum Internal {
    Status {
        link: LinkId,
        status: EngineStatus,
    },
    Deltas {
        /// `Some` for change-group poll results (drives the forced-resync
        /// flag), `None` for `Control.Get` ingestion.
        group: Option<String>,
        entries: Vec<ChangeEntry>,
        reply: Option<oneshot::Sender<Result<CommandReply, CoreError>>>,
    },
}

struct EventLoop {
    cache: Arc<ControlCache>,
    selection_tx: watch::Sender<Selection>,
    coordinator: Coordinator,
    groups: ChangeGroups,
    links: Vec<Link>,
    poll_interval: Duration,
    events_rx: mpsc::Receiver<LinkEvent>,
    internal_rx: mpsc::Receiver<Internal>,
    internal_tx: mpsc::Sender<Internal>,
    command_rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
}

async fn event_loop(mut ctx: EventLoop) {
    // Strictly periodic wall-clock ticks: a slow core delays only its own
    // responses, never future ticks. Overlapping in-flight polls are fine;
    // each correlates by its own request id.
    let mut poll_tick = tokio::time::interval(ctx.poll_interval);
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_tick = tokio::time::interval(ctx.poll_interval);
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            Some(event) = ctx.events_rx.recv() => ctx.handle_link_event(event),
            Some(internal) = ctx.internal_rx.recv() => ctx.handle_internal(internal),
            Some(envelope) = ctx.command_rx.recv() => ctx.handle_command(envelope),
            _ = poll_tick.tick() => ctx.issue_group_polls(),
            _ = status_tick.tick() => ctx.issue_status_polls(),
        }
    }
    debug!("session event loop exiting");
}

impl EventLoop {
    fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.iter().find(|l| l.id() == id)
    }

    fn apply_selection(&mut self, changed: Option<Selection>) {
        if let Some(selection) = changed {
            info!(%selection, "active core selection changed");
            self.selection_tx.send_replace(selection);
        }
    }

    // ── Link events ──────────────────────────────────────────────────

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::State { link, state } => {
                let changed = self.coordinator.link_state(link, state);
                self.apply_selection(changed);
                if state.is_connected() {
                    self.replay_groups(link);
                }
            }
            LinkEvent::Notification { link, method, params } => {
                if method == "EngineStatus" {
                    match serde_json::from_value::<EngineStatus>(params) {
                        Ok(status) => {
                            let changed =
                                self.coordinator.status_report(link, status, Instant::now());
                            self.apply_selection(changed);
                        }
                        Err(e) => debug!(%link, error = %e, "malformed EngineStatus push"),
                    }
                } else {
                    debug!(%link, %method, "unhandled notification");
                }
            }
        }
    }

    /// Mirror the full current membership onto a link that just came up,
    /// in order, on one task, so the core ends up byte-for-byte equal to
    /// the local model at this moment.
    fn replay_groups(&self, link: LinkId) {
        let Some(link) = self.link(link) else { return };
        let requests = self.groups.replay_requests();
        if requests.is_empty() {
            return;
        }
        debug!(link = %link.id(), count = requests.len(), "replaying change-group membership");
        let link = link.clone();
        tokio::spawn(async move {
            for (method, params) in requests {
                if let Err(e) = link.call(method, params).await {
                    warn!(link = %link.id(), method, error = %e, "membership replay failed");
                }
            }
        });
    }

    // ── Internal results ─────────────────────────────────────────────

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Status { link, status } => {
                let changed = self.coordinator.status_report(link, status, Instant::now());
                self.apply_selection(changed);
            }
            Internal::Deltas { group, entries, reply } => {
                // One poll cycle after an invalidate, every member emits
                // even if unchanged so consumers resynchronize.
                let force = group.as_deref().is_some_and(|g| self.groups.take_force_resync(g));

                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    let key = entry.key();
                    if let Some(error) = &entry.error {
                        // The member stays in the group; the component may
                        // appear in a later design push.
                        warn!(control = %key, %error, "member skipped in poll result");
                        continue;
                    }
                    let value = ControlValue::from_wire(&entry.value);
                    self.cache.apply_delta(&key, value, entry.string, entry.position, force);
                    if reply.is_some() {
                        if let Some(state) = self.cache.get(&key) {
                            values.push((*state).clone());
                        }
                    }
                }

                if let Some(reply) = reply {
                    let _ = reply.send(Ok(CommandReply::Values(values)));
                }
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    fn handle_command(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope { command, response_tx } = envelope;
        match command {
            Command::Status => {
                let secondary = (self.links.len() > 1)
                    .then(|| self.coordinator.status(LinkId::Secondary).clone());
                let reply = CommandReply::Status {
                    primary: self.coordinator.status(LinkId::Primary).clone(),
                    secondary,
                };
                let _ = response_tx.send(Ok(reply));
            }

            // ── Change-group bookkeeping: local model first, then mirror ──
            Command::AddControls { group, names } => {
                self.groups.add_controls(&group, &names);
                self.mirror(group::add_controls_request(&group, &names));
                let _ = response_tx.send(Ok(CommandReply::Ack));
            }
            Command::AddComponentControls { group, component, names } => {
                self.groups.add_component_controls(&group, &component, &names);
                self.mirror(group::add_component_controls_request(&group, &component, &names));
                let _ = response_tx.send(Ok(CommandReply::Ack));
            }
            Command::RemoveControls { group, names } => {
                let result = if self.groups.remove_controls(&group, &names) {
                    self.mirror(group::remove_controls_request(&group, &names));
                    Ok(CommandReply::Ack)
                } else {
                    Err(CoreError::UnknownGroup { id: group })
                };
                let _ = response_tx.send(result);
            }
            Command::DestroyGroup { group } => {
                let result = if self.groups.destroy(&group) {
                    self.mirror(group::destroy_request(&group));
                    Ok(CommandReply::Ack)
                } else {
                    Err(CoreError::UnknownGroup { id: group })
                };
                let _ = response_tx.send(result);
            }
            Command::ClearGroup { group } => {
                let result = if self.groups.clear(&group) {
                    self.mirror(group::clear_request(&group));
                    Ok(CommandReply::Ack)
                } else {
                    Err(CoreError::UnknownGroup { id: group })
                };
                let _ = response_tx.send(result);
            }
            Command::InvalidateGroup { group } => {
                let result = if self.groups.invalidate(&group) {
                    self.mirror(group::invalidate_request(&group));
                    Ok(CommandReply::Ack)
                } else {
                    Err(CoreError::UnknownGroup { id: group })
                };
                let _ = response_tx.send(result);
            }

            // ── Relative adjustment: resolved against the cache, then
            //    routed as an absolute set ──
            Command::AdjustControl { name, delta, ramp } => match self.resolve_adjust(&name, delta)
            {
                Ok(value) => {
                    let set = Command::SetControl {
                        name,
                        value: ControlValue::Number(value),
                        ramp,
                    };
                    if let Some((method, params)) = set.wire() {
                        self.route_rpc(method, params, response_tx);
                    } else {
                        let _ = response_tx
                            .send(Err(CoreError::Internal("set has no wire form".into())));
                    }
                }
                Err(e) => {
                    let _ = response_tx.send(Err(e));
                }
            },

            // ── Explicit get: routed like a mutating call, results fed
            //    back through the ingestion path ──
            Command::GetControls { names } => {
                let link = match self.routed_link("Control.Get") {
                    Ok(link) => link,
                    Err(e) => {
                        let _ = response_tx.send(Err(e));
                        return;
                    }
                };
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match link.call("Control.Get", serde_json::json!(names)).await {
                        Ok(result) => match serde_json::from_value::<Vec<ChangeEntry>>(result) {
                            Ok(entries) => {
                                let _ = internal_tx
                                    .send(Internal::Deltas {
                                        group: None,
                                        entries,
                                        reply: Some(response_tx),
                                    })
                                    .await;
                            }
                            Err(e) => {
                                let _ = response_tx.send(Err(CoreError::Internal(format!(
                                    "malformed Control.Get result: {e}"
                                ))));
                            }
                        },
                        Err(e) => {
                            let _ = response_tx.send(Err(e.into()));
                        }
                    }
                });
            }

            // ── Everything else is a thin RPC ──
            other => match other.wire() {
                Some((method, params)) => self.route_rpc(method, params, response_tx),
                None => {
                    let _ = response_tx
                        .send(Err(CoreError::Internal("command has no wire form".into())));
                }
            },
        }
    }

    fn resolve_adjust(&self, name: &str, delta: f64) -> Result<f64, CoreError> {
        let state = self
            .cache
            .get(name)
            .ok_or_else(|| CoreError::UnknownControl { name: name.to_owned() })?;
        let current = state.value.as_f64().map_err(|_| CoreError::NotNumeric {
            name: name.to_owned(),
            value: state.string.clone(),
        })?;
        Ok(current + delta)
    }

    /// Pick the legal destination link for `method`, or fail fast.
    fn routed_link(&self, method: &str) -> Result<Link, CoreError> {
        if Coordinator::is_exempt(method) {
            return self
                .links
                .iter()
                .find(|l| l.is_connected())
                .cloned()
                .ok_or(CoreError::NoActiveCore);
        }
        let id = self.coordinator.selection().link_id().ok_or(CoreError::NoActiveCore)?;
        let link = self.link(id).ok_or(CoreError::NoActiveCore)?;
        if link.is_connected() { Ok(link.clone()) } else { Err(CoreError::NoActiveCore) }
    }

    fn route_rpc(
        &self,
        method: &'static str,
        params: Value,
        response_tx: oneshot::Sender<Result<CommandReply, CoreError>>,
    ) {
        let link = match self.routed_link(method) {
            Ok(link) => link,
            Err(e) => {
                let _ = response_tx.send(Err(e));
                return;
            }
        };
        tokio::spawn(async move {
            let result = link
                .call(method, params)
                .await
                .map(|_| CommandReply::Ack)
                .map_err(CoreError::from);
            let _ = response_tx.send(result);
        });
    }

    /// Apply a change-group mutation to every connected link so whichever
    /// core becomes Active already holds the correct group state. Standby
    /// rejections are routine, not faults.
    fn mirror(&self, (method, params): (&'static str, Value)) {
        for link in self.links.iter().filter(|l| l.is_connected()) {
            let link = link.clone();
            let params = params.clone();
            tokio::spawn(async move {
                match link.call(method, params).await {
                    Ok(_) => {}
                    Err(e) if e.is_standby_rejection() => {
                        debug!(link = %link.id(), method, "mirror skipped by standby core");
                    }
                    Err(e) => {
                        warn!(link = %link.id(), method, error = %e, "change-group mirror failed");
                    }
                }
            });
        }
    }

    // ── Timers ───────────────────────────────────────────────────────

    /// Poll every non-empty group on the currently selected Active link.
    /// No selection → no polls; a standby core would reject them anyway.
    fn issue_group_polls(&mut self) {
        let Some(id) = self.coordinator.selection().link_id() else { return };
        let Some(link) = self.link(id) else { return };
        if !link.is_connected() {
            return;
        }

        for group in self.groups.poll_targets() {
            let link = link.clone();
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                let (method, params) = group::poll_request(&group);
                match link.call(method, params).await {
                    Ok(result) => match serde_json::from_value::<PollResult>(result) {
                        Ok(poll) => {
                            let _ = internal_tx
                                .send(Internal::Deltas {
                                    group: Some(group),
                                    entries: poll.changes,
                                    reply: None,
                                })
                                .await;
                        }
                        Err(e) => debug!(%group, error = %e, "malformed poll result"),
                    },
                    Err(e) if e.is_standby_rejection() => {
                        debug!(%group, "poll rejected by standby core");
                    }
                    Err(e) => debug!(%group, error = %e, "poll failed"),
                }
            });
        }
    }

    /// Refresh engine status on every connected link. `StatusGet` is
    /// exempt from the active-core rule -- it is how Active is discovered
    /// in the first place.
    fn issue_status_polls(&self) {
        for link in self.links.iter().filter(|l| l.is_connected()) {
            let link = link.clone();
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                match link.call("StatusGet", Value::Null).await {
                    Ok(result) => match serde_json::from_value::<EngineStatus>(result) {
                        Ok(status) => {
                            let _ =
                                internal_tx.send(Internal::Status { link: link.id(), status }).await;
                        }
                        Err(e) => debug!(link = %link.id(), error = %e, "malformed StatusGet result"),
                    },
                    Err(e) => debug!(link = %link.id(), error = %e, "status poll failed"),
                }
            });
        }
    }
}
