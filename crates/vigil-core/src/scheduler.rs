// ── Periodic refresh & credential rotation ──
//
// One tick: rotate the credential if it is due, push the fresh token to
// the connection manager, fetch a full snapshot with the current token,
// hand it to the reconciler. Within a tick, rotation strictly precedes
// the fetch that uses the token. Failures are local to the tick -- the
// next tick retries from scratch and the cached document is only ever
// replaced by a successful snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::credential::{Credential, CredentialStore};
use crate::error::CoreError;
use crate::gateway::Gateway;
use crate::store::StateStore;

pub struct UpdateScheduler<G: Gateway> {
    gateway: Arc<G>,
    credentials: CredentialStore,
    store: Arc<StateStore>,
    connection: ConnectionManager<G>,
    username: String,
    password: SecretString,
    location_id: String,
    poll_interval: Duration,
}

impl<G: Gateway> UpdateScheduler<G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<G>,
        credentials: CredentialStore,
        store: Arc<StateStore>,
        connection: ConnectionManager<G>,
        username: String,
        password: SecretString,
        location_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            credentials,
            store,
            connection,
            username,
            password,
            location_id,
            poll_interval,
        }
    }

    /// Run the periodic pull loop until cancelled.
    ///
    /// The caller is expected to have performed the initial fetch
    /// already, so the interval's immediate first tick is consumed.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(changed) => debug!(changed, "snapshot refresh completed"),
                        Err(e) => warn!(error = %e, "periodic refresh failed"),
                    }
                }
            }
        }
    }

    /// One refresh cycle. Returns whether the merged document changed.
    pub async fn tick(&self) -> Result<bool, CoreError> {
        let now = Utc::now();
        let mut credential = self.credentials.get().await;

        if credential.is_expired(now) {
            credential = self.rotate(credential).await?;
        }

        let snapshot = self
            .gateway
            .fetch_snapshot(&credential.access_token, &self.location_id)
            .await?;

        let outcome = self.store.apply_snapshot(snapshot).await;
        Ok(outcome.changed)
    }

    /// Rotate the credential: refresh, falling back to one full login.
    ///
    /// On success the store is updated and the new access token is
    /// pushed into the connection manager -- which never disconnects a
    /// live stream over it.
    async fn rotate(&self, current: Credential) -> Result<Credential, CoreError> {
        debug!("access token due for rotation");

        let grant = match self.gateway.refresh(&current.refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "token refresh failed, attempting full re-authentication");
                self.gateway.login(&self.username, &self.password).await?
            }
        };

        let credential = Credential::from_grant(grant, Some(current.refresh_token), Utc::now())
            .ok_or_else(|| CoreError::Protocol {
                message: "token response missing refresh token".into(),
            })?;

        self.credentials.replace(credential.clone()).await;
        self.connection.update_token(&credential.access_token).await;
        debug!("credential rotated");

        Ok(credential)
    }
}
