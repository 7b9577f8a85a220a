// Shared transport configuration for building reqwest::Client instances.
//
// The gateway talks to a public cloud endpoint, so auth is bearer-token
// per request -- no cookie jar needed.

use std::path::PathBuf;
use std::time::Duration;

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
}

/// Transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path).map_err(|e| crate::error::Error::Api {
                    status: 0,
                    message: format!("failed to read CA cert: {e}"),
                })?;
                let cert =
                    reqwest::Certificate::from_pem(&cert_pem).map_err(crate::error::Error::Transport)?;
                builder = builder.add_root_certificate(cert);
            }
        }

        builder.build().map_err(crate::error::Error::Transport)
    }
}
