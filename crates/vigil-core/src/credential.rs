// ── Credential storage ──
//
// One rotating token pair per session. The scheduler is the only
// writer; the connection manager never reads this store -- rotated
// access tokens are pushed to it explicitly via `update_token`, which
// is what keeps the two consumers lock-free with respect to each other.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use vigil_api::TokenGrant;

/// Tokens are rotated this long before their nominal expiry, so a tick
/// that lands just before the deadline never fetches with a token the
/// server is about to reject.
const SAFETY_MARGIN_SECS: i64 = 60;

/// An access/refresh token pair with its rotation deadline.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a token grant.
    ///
    /// `previous_refresh` covers refresh responses that omit the refresh
    /// token (the previously issued one stays valid). Returns `None` when
    /// neither the grant nor the fallback carries a refresh token, which
    /// on a login response is a protocol violation.
    pub fn from_grant(
        grant: TokenGrant,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let refresh_token = grant.refresh_token.or(previous_refresh)?;
        Some(Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at: now + ChronoDuration::seconds(grant.expires_in - SAFETY_MARGIN_SECS),
        })
    }

    /// Whether rotation is due at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Holder for the session's current credential.
pub struct CredentialStore {
    current: Mutex<Credential>,
}

impl CredentialStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            current: Mutex::new(credential),
        }
    }

    /// Clone out the current credential.
    pub async fn get(&self) -> Credential {
        self.current.lock().await.clone()
    }

    /// Atomically replace the credential.
    pub async fn replace(&self, credential: Credential) {
        *self.current.lock().await = credential;
    }
}
