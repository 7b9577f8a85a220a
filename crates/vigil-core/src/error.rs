// ── Core error types ──
//
// Host-facing errors from vigil-core. The `From<vigil_api::Error>` impl
// translates transport-layer failures into domain-appropriate variants;
// hosts never see raw HTTP status codes for routine failures.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Credentials rejected -- user action required, no automatic retry
    /// beyond the one refresh→login fallback per scheduler tick.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Transient network or gateway failure; the next tick or reconnect
    /// attempt retries on its own.
    #[error("Gateway unavailable: {message}")]
    GatewayUnavailable { message: String },

    /// A response was missing fields the protocol requires. The failed
    /// call is discarded wholesale -- nothing is applied to the cache.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Session is shut down or was never connected.
    #[error("Session is not connected")]
    NotConnected,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl From<vigil_api::Error> for CoreError {
    fn from(err: vigil_api::Error) -> Self {
        match &err {
            vigil_api::Error::Authentication { message }
            | vigil_api::Error::RefreshRejected { message } => CoreError::AuthenticationFailed {
                message: message.clone(),
            },
            vigil_api::Error::Deserialization { message, .. } => CoreError::Protocol {
                message: message.clone(),
            },
            vigil_api::Error::InvalidUrl(e) => CoreError::Config {
                message: e.to_string(),
            },
            _ => CoreError::GatewayUnavailable {
                message: err.to_string(),
            },
        }
    }
}
