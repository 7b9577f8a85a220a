// ── Session ──
//
// Composition root: one Session per tracked installation, owning the
// credential store, cached document, connection manager, and scheduler.
// No process-wide state -- a host tracking several installations holds
// several independent Sessions.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_api::StateDocument;

use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, StatusUpdate};
use crate::credential::{Credential, CredentialStore};
use crate::error::CoreError;
use crate::gateway::Gateway;
use crate::scheduler::UpdateScheduler;
use crate::store::StateStore;

/// The host-facing entry point for one installation.
///
/// `connect()` authenticates, loads the first snapshot, and starts the
/// background machinery (pull loop, streaming connection, event pump).
/// Hosts observe the session through [`data_updates`](Self::data_updates)
/// and [`status_updates`](Self::status_updates) and must treat received
/// documents as read-only.
pub struct Session<G: Gateway> {
    inner: Arc<SessionInner<G>>,
}

impl<G: Gateway> Clone for Session<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<G: Gateway> {
    config: SessionConfig,
    gateway: Arc<G>,
    store: Arc<StateStore>,
    connection: ConnectionManager<G>,
    scheduler: Mutex<Option<Arc<UpdateScheduler<G>>>>,
    cancel: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<G: Gateway> Session<G> {
    /// Create a session. Does NOT connect -- call
    /// [`connect()`](Self::connect) to authenticate and start the
    /// background tasks.
    pub fn new(config: SessionConfig, gateway: Arc<G>) -> Self {
        let connection = ConnectionManager::new(
            Arc::clone(&gateway),
            config.location_id.clone(),
            config.reconnect_interval,
            config.reconnect_warn_every,
        );

        Self {
            inner: Arc::new(SessionInner {
                config,
                gateway,
                store: Arc::new(StateStore::new()),
                connection,
                scheduler: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Authenticate, load the first snapshot, and start background
    /// tasks. Idempotent: a second call on a live session is a no-op.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut scheduler_slot = self.inner.scheduler.lock().await;
        if scheduler_slot.is_some() {
            return Ok(());
        }

        let config = &self.inner.config;

        // Initial authentication. A login response without a refresh
        // token cannot sustain rotation, so it is rejected outright.
        let grant = self
            .inner
            .gateway
            .login(&config.username, &config.password)
            .await?;
        let credential =
            Credential::from_grant(grant, None, Utc::now()).ok_or_else(|| CoreError::Protocol {
                message: "login response missing refresh token".into(),
            })?;
        debug!("authenticated");

        // Initial snapshot, before any background machinery runs.
        let snapshot = self
            .inner
            .gateway
            .fetch_snapshot(&credential.access_token, &config.location_id)
            .await?;
        self.inner.store.apply_snapshot(snapshot).await;

        self.inner.connection.update_token(&credential.access_token).await;

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().await = cancel.clone();

        let scheduler = Arc::new(UpdateScheduler::new(
            Arc::clone(&self.inner.gateway),
            CredentialStore::new(credential),
            Arc::clone(&self.inner.store),
            self.inner.connection.clone(),
            config.username.clone(),
            config.password.clone(),
            config.location_id.clone(),
            config.poll_interval,
        ));
        *scheduler_slot = Some(Arc::clone(&scheduler));
        drop(scheduler_slot);

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(
            Arc::clone(&scheduler).run(cancel.clone()),
        ));
        handles.push(tokio::spawn(event_pump(
            self.clone(),
            scheduler,
            self.inner.connection.subscribe_events(),
            cancel,
        )));
        drop(handles);

        if config.stream_enabled {
            if !self.inner.connection.connect().await {
                // Not fatal: the reconnect loop is already running and
                // polling keeps the document fresh meanwhile.
                warn!("stream connection failed, continuing on polling until it heals");
            }
        } else {
            info!("stream disabled by configuration, polling only");
        }

        info!("session connected");
        Ok(())
    }

    /// Stop background tasks and close the streaming connection.
    ///
    /// The cached document is discarded with the session; there is no
    /// persistence.
    pub async fn disconnect(&self) {
        self.inner.cancel.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.inner.connection.disconnect().await;
        *self.inner.scheduler.lock().await = None;
        debug!("session disconnected");
    }

    // ── Observation ──────────────────────────────────────────────────

    /// The latest merged document.
    pub fn document(&self) -> Arc<StateDocument> {
        self.inner.store.document()
    }

    /// Subscribe to merged-document updates.
    pub fn data_updates(&self) -> watch::Receiver<Arc<StateDocument>> {
        self.inner.store.subscribe()
    }

    /// Subscribe to streaming-connection status transitions.
    pub fn status_updates(&self) -> watch::Receiver<StatusUpdate> {
        self.inner.connection.subscribe_status()
    }

    /// Current streaming-connection status.
    pub fn stream_status(&self) -> StatusUpdate {
        self.inner.connection.status()
    }

    pub fn is_stream_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    // ── Manual nudges ────────────────────────────────────────────────

    /// Run one refresh cycle now, outside the schedule. Surfaces the
    /// tick's failure to the caller instead of just logging it.
    pub async fn refresh_now(&self) -> Result<bool, CoreError> {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .await
            .clone()
            .ok_or(CoreError::NotConnected)?;
        scheduler.tick().await
    }

    /// Ask the connection manager to retry now (e.g. the host observed
    /// the network coming back).
    pub async fn request_reconnect(&self, reason: &str) {
        self.inner.connection.request_reconnect(reason).await;
    }
}

// ── Event pump ───────────────────────────────────────────────────────

/// Feed stream events into the reconciler until cancelled.
///
/// A misbehaving downstream can never corrupt connection state: the
/// pump only reads from the broadcast channel, and reconciliation
/// anomalies (unknown devices, malformed payloads) are logged and
/// dropped inside the store.
async fn event_pump<G: Gateway>(
    session: Session<G>,
    scheduler: Arc<UpdateScheduler<G>>,
    mut events: broadcast::Receiver<Arc<vigil_api::StreamEvent>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event) => {
                let outcome = session.inner.store.apply_event(&event).await;

                if let Some(device_id) = outcome.unknown_device {
                    if session.inner.config.refresh_on_unknown_device {
                        debug!(device_id, "unknown device in patch, fetching fresh snapshot");
                        if let Err(e) = scheduler.tick().await {
                            warn!(error = %e, "out-of-band refresh failed");
                        }
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Dropped patches self-correct at the next snapshot.
                warn!(skipped, "event consumer lagged behind the stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
