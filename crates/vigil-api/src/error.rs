use thiserror::Error;

/// Top-level error type for the `vigil-api` crate.
///
/// Covers every failure mode of the gateway: authentication, token
/// refresh, transport, response shape, and the event stream.
/// `vigil-core` maps these into domain-facing variants.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, account locked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Refresh token rejected -- full re-authentication required.
    #[error("Token refresh rejected: {message}")]
    RefreshRejected { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── API responses ───────────────────────────────────────────────
    /// Unexpected HTTP status from the API.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Event stream ────────────────────────────────────────────────
    /// Event stream connection failed (handshake, TLS, timeout).
    #[error("Stream connection failed: {0}")]
    StreamConnect(String),

    /// Event stream dropped mid-session.
    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

impl Error {
    /// Returns `true` if this error means the credential itself is bad
    /// and retrying without re-authentication is pointless.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::RefreshRejected { .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::StreamConnect(_) | Self::StreamClosed(_) => true,
            _ => false,
        }
    }
}
