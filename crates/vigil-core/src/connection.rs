// ── Streaming connection lifecycle ──
//
// Owns one streaming connection and guarantees that any break in it
// eventually self-heals without caller action. Retry policy is a single
// fixed-interval, infinite loop owned here and nowhere else -- the
// transport performs no retries of its own, so a just-succeeded
// connection can never race a second attempt from another mechanism.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_api::StreamEvent;

use crate::gateway::{EventSource, Gateway};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream event kind the server uses to signal a failed or failing
/// session; treated as a disconnect whenever it arrives.
const KIND_CONNECT_ERROR: &str = "connect-error";

// ── Status ───────────────────────────────────────────────────────────

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection has ever been attempted.
    NotInitialized,
    Connecting,
    Connected,
    Disconnected,
}

/// A status plus the free-text reason that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ConnectionStatus,
    pub reason: Option<String>,
}

// ── ConnectionManager ────────────────────────────────────────────────

/// Handle to the streaming connection for one installation.
///
/// Cheaply cloneable; all clones share the same underlying state.
pub struct ConnectionManager<G: Gateway> {
    inner: Arc<ConnInner<G>>,
}

impl<G: Gateway> Clone for ConnectionManager<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TaskHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ConnInner<G: Gateway> {
    gateway: Arc<G>,
    location_id: String,
    /// Token used by the *next* connection attempt. Written only via
    /// `update_token`; never read from the credential store.
    token: Mutex<String>,
    reconnect_interval: Duration,
    warn_every: u32,
    status_tx: watch::Sender<StatusUpdate>,
    event_tx: broadcast::Sender<Arc<StreamEvent>>,
    shutting_down: AtomicBool,
    /// Serializes connection attempts (user call vs. reconnect loop).
    connect_lock: Mutex<()>,
    reconnect: Mutex<Option<TaskHandle>>,
    reader: Mutex<Option<TaskHandle>>,
}

impl<G: Gateway> ConnectionManager<G> {
    pub fn new(
        gateway: Arc<G>,
        location_id: impl Into<String>,
        reconnect_interval: Duration,
        warn_every: u32,
    ) -> Self {
        let (status_tx, _) = watch::channel(StatusUpdate {
            status: ConnectionStatus::NotInitialized,
            reason: None,
        });
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(ConnInner {
                gateway,
                location_id: location_id.into(),
                token: Mutex::new(String::new()),
                reconnect_interval,
                warn_every: warn_every.max(1),
                status_tx,
                event_tx,
                shutting_down: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                reconnect: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Current status and reason.
    pub fn status(&self) -> StatusUpdate {
        self.inner.status_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status_tx.borrow().status == ConnectionStatus::Connected
    }

    /// Subscribe to status transitions. The sender emits each distinct
    /// transition exactly once (no-op re-entries are suppressed), but
    /// the channel has last-value semantics: a subscriber that falls
    /// behind a rapid burst observes only the most recent status, not
    /// every intermediate one.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusUpdate> {
        self.inner.status_tx.subscribe()
    }

    /// Subscribe to inbound stream events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── Public operations ────────────────────────────────────────────

    /// Establish the streaming connection.
    ///
    /// Returns whether the attempt succeeded. On failure the reconnect
    /// loop is started, so the connection still self-heals without
    /// further caller action.
    pub async fn connect(&self) -> bool {
        self.connect_inner(false).await
    }

    /// Shut the connection down and stop all automatic reconnects.
    ///
    /// Awaits the reconnect loop so that an attempt already in flight
    /// is aborted at its next await point and can no longer promote the
    /// manager back to `Connected` after this returns. Bounded: a
    /// transport that never acknowledges the close cannot stall
    /// shutdown. Afterwards the manager is reusable -- a later
    /// `connect()` starts over.
    pub async fn disconnect(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        if let Some(task) = self.inner.reconnect.lock().await.take() {
            task.cancel.cancel();
            let _ = tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, task.handle).await;
        }

        if let Some(reader) = self.inner.reader.lock().await.take() {
            reader.cancel.cancel();
            let _ = tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, reader.handle).await;
        }

        self.set_status(ConnectionStatus::Disconnected, Some("manual disconnect"));
        self.inner.shutting_down.store(false, Ordering::SeqCst);
    }

    /// Replace the token used by the next connection attempt.
    ///
    /// Deliberately does NOT tear down a live connection: the stream
    /// transport does not require re-auth mid-session, so rotating the
    /// token on a healthy connection would be pointless churn. If the
    /// manager is currently disconnected, the reconnect loop is kicked
    /// immediately instead of waiting for its next tick.
    pub async fn update_token(&self, token: &str) {
        if token.is_empty() {
            return;
        }

        {
            let mut current = self.inner.token.lock().await;
            if *current != token {
                *current = token.to_owned();
                debug!("stream token updated");
            }
        }

        if self.status().status == ConnectionStatus::Disconnected && !self.is_shutting_down() {
            self.start_reconnect_loop("token updated while disconnected")
                .await;
        }
    }

    /// External nudge (e.g. network became reachable): start the retry
    /// loop now if disconnected. No-op when connected or shutting down.
    pub async fn request_reconnect(&self, reason: &str) {
        if self.is_shutting_down() || self.status().status != ConnectionStatus::Disconnected {
            return;
        }
        self.start_reconnect_loop(reason).await;
    }

    // ── Connection attempt ───────────────────────────────────────────

    /// Boxed rather than an `async fn`: the reconnect loop awaits this
    /// and this spawns the reconnect loop, so the future type must be
    /// named to keep the recursion out of the opaque return type.
    fn connect_inner(
        &self,
        from_reconnect_loop: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            if self.is_shutting_down() {
                debug!("skipping connect during shutdown");
                return false;
            }

            let guard = self.inner.connect_lock.lock().await;

            if self.is_connected() {
                return true;
            }

            // Drop any stale reader before attempting a fresh connection.
            if let Some(reader) = self.inner.reader.lock().await.take() {
                reader.cancel.cancel();
                let _ = tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, reader.handle).await;
            }

            self.set_status(ConnectionStatus::Connecting, None);

            let token = self.inner.token.lock().await.clone();
            let attempt = self
                .inner
                .gateway
                .open_stream(&token, &self.inner.location_id)
                .await;

            match attempt {
                Ok(mut stream) => {
                    // A shutdown may have begun while the handshake was
                    // in flight; the manager must stay down.
                    if self.is_shutting_down() {
                        stream.close().await;
                        debug!("discarding stream established during shutdown");
                        return false;
                    }

                    // Cancel any in-flight reconnect loop *before* reporting
                    // Connected, so a duplicate attempt can never race a
                    // just-succeeded one.
                    self.stop_reconnect_loop().await;

                    let cancel = CancellationToken::new();
                    let handle = tokio::spawn(read_events(self.clone(), stream, cancel.clone()));
                    *self.inner.reader.lock().await = Some(TaskHandle { cancel, handle });

                    self.set_status(ConnectionStatus::Connected, None);
                    true
                }
                Err(e) => {
                    self.set_status(ConnectionStatus::Disconnected, Some(&e.to_string()));
                    drop(guard);
                    if !from_reconnect_loop {
                        self.start_reconnect_loop("connect failed").await;
                    }
                    false
                }
            }
        })
    }

    // ── Reconnect loop ───────────────────────────────────────────────

    /// Idempotent: starting while a loop is already alive is a no-op.
    async fn start_reconnect_loop(&self, reason: &str) {
        if self.is_shutting_down() {
            return;
        }

        let mut slot = self.inner.reconnect.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.handle.is_finished() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconnect_loop(self.clone(), cancel.clone()));
        *slot = Some(TaskHandle { cancel, handle });

        info!(
            reason,
            interval_secs = self.inner.reconnect_interval.as_secs(),
            "reconnect loop started"
        );
    }

    /// Cancel the loop without awaiting it -- the loop itself may be the
    /// caller (via a successful `connect_inner`).
    async fn stop_reconnect_loop(&self) {
        if let Some(task) = self.inner.reconnect.lock().await.take() {
            task.cancel.cancel();
        }
    }

    // ── Status bookkeeping ───────────────────────────────────────────

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ConnectionStatus, reason: Option<&str>) {
        let next = StatusUpdate {
            status,
            reason: reason.map(str::to_owned),
        };

        let changed = self.inner.status_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if !changed {
            return;
        }

        match status {
            ConnectionStatus::Connected => info!("stream connected"),
            ConnectionStatus::Disconnected => {
                if should_warn_disconnect(reason) {
                    warn!(reason = reason.unwrap_or("<none>"), "stream disconnected");
                } else {
                    debug!(reason = reason.unwrap_or("<none>"), "stream disconnected");
                }
            }
            ConnectionStatus::Connecting | ConnectionStatus::NotInitialized => {
                debug!(?status, "stream status changed");
            }
        }
    }
}

/// Routine breakages (transport drops, failed attempts, manual
/// shutdown) log at debug; the reconnect loop already escalates
/// sustained outages. Anything else is unexpected and warns.
fn should_warn_disconnect(reason: Option<&str>) -> bool {
    let Some(reason) = reason else { return true };
    if reason == "manual disconnect" {
        return false;
    }
    let transient_prefixes = [
        "Stream connection failed",
        "Stream closed",
        "stream ended",
        "connect error",
    ];
    !transient_prefixes.iter().any(|p| reason.starts_with(p))
}

// ── Background tasks ─────────────────────────────────────────────────

/// Read events from one live stream until it drops, then hand control
/// back to the reconnect loop.
async fn read_events<G: Gateway>(
    manager: ConnectionManager<G>,
    mut stream: G::Stream,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                stream.close().await;
                return;
            }
            event = stream.next_event() => match event {
                Some(Ok(event)) => {
                    if event.kind == KIND_CONNECT_ERROR {
                        break connect_error_reason(&event);
                    }

                    // Some reconnect paths deliver data before any
                    // handshake confirmation; data arrival is proof of
                    // liveness.
                    if !manager.is_connected() {
                        manager.stop_reconnect_loop().await;
                        manager.set_status(ConnectionStatus::Connected, Some("event received"));
                    }

                    let _ = manager.inner.event_tx.send(Arc::new(event));
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_owned(),
            }
        }
    };

    manager.set_status(ConnectionStatus::Disconnected, Some(&reason));
    if !manager.is_shutting_down() {
        manager.start_reconnect_loop("disconnect event").await;
    }
}

fn connect_error_reason(event: &StreamEvent) -> String {
    match event.data.as_str() {
        Some(detail) => format!("connect error: {detail}"),
        None if event.data.is_null() => "connect error".to_owned(),
        None => format!("connect error: {}", event.data),
    }
}

/// Retry forever at a fixed interval until connected, cancelled, or
/// shut down. Every failed attempt logs at debug except the first and
/// every Nth, which warn -- sustained outages stay visible without
/// flooding the log.
async fn reconnect_loop<G: Gateway>(manager: ConnectionManager<G>, cancel: CancellationToken) {
    let interval = manager.inner.reconnect_interval;
    let warn_every = manager.inner.warn_every;
    let mut attempt: u32 = 0;

    loop {
        if manager.is_shutting_down() || cancel.is_cancelled() {
            return;
        }
        if manager.is_connected() {
            return;
        }

        attempt += 1;
        debug!(attempt, "reconnect attempt started");

        // Cancellation must abort an attempt mid-handshake, not just
        // between attempts -- otherwise a disconnect that returned
        // while the handshake was pending could be undone by it.
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            connected = manager.connect_inner(true) => connected,
        };
        if connected {
            info!(attempt, "reconnect succeeded");
            return;
        }

        if attempt == 1 || attempt % warn_every == 0 {
            warn!(
                attempt,
                retry_in_secs = interval.as_secs(),
                "reconnect attempt failed"
            );
        } else {
            debug!(
                attempt,
                retry_in_secs = interval.as_secs(),
                "reconnect attempt failed"
            );
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
