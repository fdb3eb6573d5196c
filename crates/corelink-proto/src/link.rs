//! Transport link with auto-reconnect.
//!
//! One [`Link`] owns one TCP connection to one core. The background task
//! runs connect → authenticate → read until the stream drops, then waits
//! out a fixed backoff and reconnects, forever, until cancellation. State
//! transitions publish on a `watch` channel and on the shared link-event
//! queue; inbound notifications go to the event queue; responses resolve
//! through the link's [`Correlator`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::RecordCodec;
use crate::correlator::Correlator;
use crate::error::Error;
use crate::message::{Message, Request, parse};

/// Default control port on a core.
pub const DEFAULT_PORT: u16 = 1710;

const OUTBOUND_QUEUE: usize = 64;

// ── Configuration ────────────────────────────────────────────────────

/// Address of one candidate core. Immutable for the life of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreEndpoint {
    pub host: String,
    pub port: u16,
}

impl CoreEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for CoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Logon credentials for a core with access control enabled.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Timing knobs for one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Deadline for TCP connect.
    pub connect_timeout: Duration,
    /// Per-request response deadline.
    pub request_timeout: Duration,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Idle interval after which a `NoOp` keepalive is sent.
    pub keepalive: Duration,
}

impl LinkConfig {
    /// Derive link timing from the session poll interval: the reconnect
    /// delay tracks the poll cadence with a 1 s floor so a fast-polling
    /// session does not hammer a dead core.
    pub fn from_poll_interval(poll_interval: Duration) -> Self {
        Self {
            reconnect_delay: (poll_interval * 10).clamp(Duration::from_secs(1), Duration::from_secs(10)),
            ..Self::default()
        }
    }

    /// Backoff used when the last failure was non-transient (bad
    /// credentials, unresolvable host). Retrying fast cannot help.
    fn extended_delay(&self) -> Duration {
        (self.reconnect_delay * 10).min(Duration::from_secs(30))
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            keepalive: Duration::from_secs(30),
        }
    }
}

// ── Identity and state ───────────────────────────────────────────────

/// Which configured core a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkId {
    Primary,
    Secondary,
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Connection state of one link, driven only by socket events and the
/// authentication outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Last failure was non-transient; reconnecting on extended backoff.
    Faulted,
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Connected => write!(f, "Connected"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

/// Events a link publishes onto the session's single-consumer queue.
#[derive(Debug)]
pub enum LinkEvent {
    State { link: LinkId, state: LinkState },
    Notification { link: LinkId, method: String, params: Value },
}

// ── Link handle ──────────────────────────────────────────────────────

struct LinkInner {
    id: LinkId,
    endpoint: CoreEndpoint,
    config: LinkConfig,
    correlator: Correlator,
    state_tx: watch::Sender<LinkState>,
    /// Per-connection outbound sender. `None` while not connected, so
    /// callers fail fast instead of queueing into a dead link.
    outbound: Mutex<Option<mpsc::Sender<Request>>>,
    last_outbound: Mutex<Instant>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Handle to one core's control link. Cheaply cloneable.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl Link {
    /// Spawn the reconnect loop for one core and return its handle.
    ///
    /// The task runs until `cancel` fires. State transitions and inbound
    /// notifications are delivered on `events`.
    pub fn spawn(
        id: LinkId,
        endpoint: CoreEndpoint,
        credentials: Option<Credentials>,
        config: LinkConfig,
        events: mpsc::Sender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let inner = Arc::new(LinkInner {
            id,
            endpoint,
            config,
            correlator: Correlator::new(),
            state_tx,
            outbound: Mutex::new(None),
            last_outbound: Mutex::new(Instant::now()),
            cancel,
        });

        tokio::spawn(run_link(Arc::clone(&inner), credentials, events));

        Self { inner }
    }

    pub fn id(&self) -> LinkId {
        self.inner.id
    }

    pub fn endpoint(&self) -> &CoreEndpoint {
        &self.inner.endpoint
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to state transitions.
    pub fn state_stream(&self) -> watch::Receiver<LinkState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of requests currently awaiting a response on this link.
    pub fn in_flight(&self) -> usize {
        self.inner.correlator.in_flight()
    }

    /// Issue one request and await its result.
    ///
    /// Fails immediately with [`Error::NotConnected`] when the link is not
    /// connected — nothing is queued or buffered. A response is matched by
    /// id; a disconnect while waiting yields [`Error::LinkLost`]; silence
    /// past the deadline yields [`Error::Timeout`] and the pending entry is
    /// dropped (the id is never reused).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let tx = lock(&self.inner.outbound).clone().ok_or(Error::NotConnected)?;

        let (id, rx) = self.inner.correlator.register();
        if tx.send(Request::new(id, method, params)).await.is_err() {
            self.inner.correlator.discard(id);
            return Err(Error::NotConnected);
        }
        *lock(&self.inner.last_outbound) = Instant::now();

        match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::LinkLost),
            Err(_) => {
                self.inner.correlator.discard(id);
                Err(Error::Timeout(self.inner.config.request_timeout))
            }
        }
    }
}

// ── Background reconnect loop ────────────────────────────────────────

/// Main loop: connect → authenticate → read → on error, backoff → retry.
async fn run_link(
    inner: Arc<LinkInner>,
    credentials: Option<Credentials>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        set_state(&inner, &events, LinkState::Connecting).await;
        let outcome = connect_and_run(&inner, credentials.as_ref(), &events).await;

        // Teardown for this connection generation: stop accepting sends,
        // then fail everything that was in flight.
        *lock(&inner.outbound) = None;
        inner.correlator.fail_all(|| Error::LinkLost);

        let delay = match outcome {
            Ok(()) => {
                debug!(link = %inner.id, "link closed, reconnecting");
                set_state(&inner, &events, LinkState::Disconnected).await;
                inner.config.reconnect_delay
            }
            Err(e) if e.is_fatal() => {
                warn!(link = %inner.id, error = %e, "link faulted");
                set_state(&inner, &events, LinkState::Faulted).await;
                inner.config.extended_delay()
            }
            Err(e) => {
                warn!(link = %inner.id, error = %e, "link lost");
                set_state(&inner, &events, LinkState::Disconnected).await;
                inner.config.reconnect_delay
            }
        };

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    *lock(&inner.outbound) = None;
    inner.correlator.fail_all(|| Error::LinkLost);
    let _ = inner.state_tx.send_replace(LinkState::Disconnected);
    debug!(link = %inner.id, "link task exiting");
}

/// One connection generation: resolve, connect, authenticate, then pump
/// frames until the stream errors or closes. `Ok(())` is a clean close.
async fn connect_and_run(
    inner: &Arc<LinkInner>,
    credentials: Option<&Credentials>,
    events: &mpsc::Sender<LinkEvent>,
) -> Result<(), Error> {
    let addr = inner.endpoint.addr();
    let mut resolved = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| Error::Resolve { endpoint: addr.clone(), source: e })?;
    let peer = resolved.next().ok_or_else(|| Error::Resolve {
        endpoint: addr.clone(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
    })?;

    let stream = tokio::time::timeout(inner.config.connect_timeout, TcpStream::connect(peer))
        .await
        .map_err(|_| Error::Timeout(inner.config.connect_timeout))??;
    debug!(link = %inner.id, %peer, "control link established");

    let (mut sink, mut stream) = Framed::new(stream, RecordCodec).split();

    // Writer task: drains the per-connection outbound queue. Aborted when
    // this generation ends.
    let (out_tx, mut out_rx) = mpsc::channel::<Request>(OUTBOUND_QUEUE);
    let writer_id = inner.id;
    let writer = tokio::spawn(async move {
        while let Some(request) = out_rx.recv().await {
            if let Err(e) = sink.send(request).await {
                debug!(link = %writer_id, error = %e, "write failed");
                break;
            }
        }
    });

    let result = drive_connection(inner, credentials, events, &out_tx, &mut stream).await;
    writer.abort();
    result
}

async fn drive_connection(
    inner: &Arc<LinkInner>,
    credentials: Option<&Credentials>,
    events: &mpsc::Sender<LinkEvent>,
    out_tx: &mpsc::Sender<Request>,
    stream: &mut (impl futures_util::Stream<Item = Result<String, Error>> + Unpin),
) -> Result<(), Error> {
    // Authentication gate: if credentials are configured, the Logon call
    // is the only traffic allowed on the wire until it resolves.
    if let Some(credentials) = credentials {
        set_state(inner, events, LinkState::Authenticating).await;

        let (id, mut logon_rx) = inner.correlator.register();
        let params = json!({
            "User": credentials.username,
            "Password": credentials.password.expose_secret(),
        });
        if out_tx.send(Request::new(id, "Logon", params)).await.is_err() {
            return Err(Error::ChannelClosed);
        }
        *lock(&inner.last_outbound) = Instant::now();

        let deadline = tokio::time::sleep(inner.config.request_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => return Ok(()),
                () = &mut deadline => return Err(Error::Timeout(inner.config.request_timeout)),
                outcome = &mut logon_rx => {
                    match outcome {
                        Ok(Ok(_)) => {
                            debug!(link = %inner.id, "logon accepted");
                            break;
                        }
                        Ok(Err(e)) => return Err(classify_logon_failure(e)),
                        Err(_) => return Err(Error::ChannelClosed),
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(record)) => dispatch_record(inner, events, &record).await,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    // Open for traffic.
    *lock(&inner.outbound) = Some(out_tx.clone());
    set_state(inner, events, LinkState::Connected).await;

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + inner.config.keepalive,
        inner.config.keepalive,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            _ = keepalive.tick() => send_keepalive_if_idle(inner, out_tx).await,
            frame = stream.next() => {
                match frame {
                    Some(Ok(record)) => dispatch_record(inner, events, &record).await,
                    Some(Err(e)) => return Err(e),
                    None => {
                        debug!(link = %inner.id, "peer closed the connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Route one inbound record: responses and errors resolve the pending
/// table, notifications go to the session queue, garbage is dropped.
async fn dispatch_record(
    inner: &Arc<LinkInner>,
    events: &mpsc::Sender<LinkEvent>,
    record: &str,
) {
    match parse(record) {
        Ok(Message::Response { id, result }) => {
            inner.correlator.resolve(id, Ok(result));
        }
        Ok(Message::Error { id: Some(id), error }) => {
            inner
                .correlator
                .resolve(id, Err(Error::Remote { code: error.code, message: error.message }));
        }
        Ok(Message::Error { id: None, error }) => {
            warn!(link = %inner.id, code = error.code, message = %error.message,
                "remote error without request id");
        }
        Ok(Message::Notification { method, params }) => {
            let _ = events
                .send(LinkEvent::Notification { link: inner.id, method, params })
                .await;
        }
        Err(e) => {
            debug!(link = %inner.id, error = %e, "dropping unparseable record");
        }
    }
}

/// `NoOp` keepalive on links that have been outbound-idle for a full
/// keepalive interval, so half-open TCP sessions surface as read errors.
async fn send_keepalive_if_idle(inner: &Arc<LinkInner>, out_tx: &mpsc::Sender<Request>) {
    let idle = lock(&inner.last_outbound).elapsed();
    if idle < inner.config.keepalive {
        return;
    }
    // The result is irrelevant; dropping the receiver lets the correlator
    // discard the entry whenever the response lands.
    let (id, _rx) = inner.correlator.register();
    if out_tx.send(Request::new(id, "NoOp", Value::Null)).await.is_ok() {
        *lock(&inner.last_outbound) = Instant::now();
        debug!(link = %inner.id, "keepalive sent");
    }
}

fn classify_logon_failure(e: Error) -> Error {
    match e {
        Error::Remote { code: _, message } => Error::Authentication { message },
        other => other,
    }
}

/// Publish a state transition on the watch channel and the event queue.
/// No-op when the state is unchanged.
async fn set_state(inner: &Arc<LinkInner>, events: &mpsc::Sender<LinkEvent>, state: LinkState) {
    let changed = inner.state_tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            *current = state;
            true
        }
    });
    if changed {
        debug!(link = %inner.id, %state, "link state");
        let _ = events.send(LinkEvent::State { link: inner.id, state }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_config_tracks_poll_interval() {
        let fast = LinkConfig::from_poll_interval(Duration::from_millis(30));
        assert_eq!(fast.reconnect_delay, Duration::from_secs(1));

        let medium = LinkConfig::from_poll_interval(Duration::from_millis(350));
        assert_eq!(medium.reconnect_delay, Duration::from_millis(3500));

        let slow = LinkConfig::from_poll_interval(Duration::from_secs(60));
        assert_eq!(slow.reconnect_delay, Duration::from_secs(10));
    }

    #[test]
    fn extended_delay_is_capped() {
        let config = LinkConfig { reconnect_delay: Duration::from_secs(10), ..LinkConfig::default() };
        assert_eq!(config.extended_delay(), Duration::from_secs(30));

        let short = LinkConfig { reconnect_delay: Duration::from_secs(1), ..LinkConfig::default() };
        assert_eq!(short.extended_delay(), Duration::from_secs(10));
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(CoreEndpoint::new("core-a.local", DEFAULT_PORT).to_string(), "core-a.local:1710");
    }
}
