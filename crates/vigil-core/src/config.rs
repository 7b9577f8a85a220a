// ── Runtime session configuration ──
//
// Describes one installation to track. Built by the host and handed to
// `Session::new` -- the core never reads config files or keyrings.

use std::time::Duration;

use secrecy::SecretString;

/// Configuration for one tracked installation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account username (email).
    pub username: String,
    /// Account password.
    pub password: SecretString,
    /// Installation identifier, as returned by `list_locations`.
    pub location_id: String,
    /// How often to pull a full snapshot.
    pub poll_interval: Duration,
    /// Fixed delay between stream reconnect attempts. The vendor
    /// endpoint rate-limits aggressively, so this stays on the order
    /// of minutes -- no exponential backoff.
    pub reconnect_interval: Duration,
    /// Every Nth failed reconnect attempt (and the first) logs at warn
    /// instead of debug.
    pub reconnect_warn_every: u32,
    /// Whether to maintain the streaming connection at all. When off,
    /// the session is poll-only.
    pub stream_enabled: bool,
    /// Whether a patch event naming an unknown device triggers an
    /// out-of-band snapshot fetch. Off by default: the patch is dropped
    /// and the next scheduled snapshot converges.
    pub refresh_on_unknown_device: bool,
}

impl SessionConfig {
    pub fn new(
        username: impl Into<String>,
        password: SecretString,
        location_id: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password,
            location_id: location_id.into(),
            poll_interval: Duration::from_secs(120),
            reconnect_interval: Duration::from_secs(300),
            reconnect_warn_every: 12,
            stream_enabled: true,
            refresh_on_unknown_device: false,
        }
    }
}
