// Gateway HTTP client
//
// Wraps `reqwest::Client` with vendor-specific URL construction and
// response classification. All methods return typed payloads or a
// classified `Error` -- ordinary HTTP failures never panic or get
// partially applied.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::model::{Location, StateDocument, TokenGrant};
use crate::transport::TransportConfig;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP client for the alarm cloud's REST API.
///
/// Stateless apart from the connection pool: the caller supplies the
/// bearer token on every data call, so one client can serve many
/// token rotations.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    stream_url: Url,
}

impl GatewayClient {
    /// Create a new gateway client from a `TransportConfig`.
    ///
    /// `base_url` is the REST root (trailing slash significant for
    /// joins). The streaming endpoint defaults to the same host at the
    /// root path; override with [`with_stream_url`](Self::with_stream_url).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let mut stream_url = base_url.clone();
        stream_url.set_path("/");
        Ok(Self {
            http,
            base_url,
            stream_url,
        })
    }

    /// Use a dedicated streaming endpoint instead of the REST host.
    pub fn with_stream_url(mut self, stream_url: Url) -> Self {
        self.stream_url = stream_url;
        self
    }

    /// The REST base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Auth endpoints ───────────────────────────────────────────────

    /// Exchange username/password for a token grant.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, Error> {
        let url = self.endpoint("oauth/token")?;
        debug!(%url, "POST login");

        let resp = self
            .http
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 => parse_body(resp).await,
            400 | 401 | 403 => Err(Error::Authentication {
                message: format!("login rejected with status {}", resp.status()),
            }),
            status => Err(api_error(status, resp).await),
        }
    }

    /// Exchange a refresh token for a fresh grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, Error> {
        let url = self.endpoint("oauth/refresh-token")?;
        debug!(%url, "POST refresh");

        let resp = self
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        match resp.status().as_u16() {
            200 | 201 => parse_body(resp).await,
            400 | 401 | 403 => Err(Error::RefreshRejected {
                message: format!("refresh rejected with status {}", resp.status()),
            }),
            status => Err(api_error(status, resp).await),
        }
    }

    // ── Data endpoints ───────────────────────────────────────────────

    /// List the installations the account can access.
    pub async fn list_locations(&self, token: &str) -> Result<Vec<Location>, Error> {
        let url = self.endpoint("locations")?;
        self.get(url, token).await
    }

    /// Fetch the full state snapshot for one installation.
    pub async fn fetch_snapshot(
        &self,
        token: &str,
        location_id: &str,
    ) -> Result<StateDocument, Error> {
        let url = self.endpoint(&format!("home/{location_id}"))?;
        self.get(url, token).await
    }

    // ── Stream URL construction ──────────────────────────────────────

    /// Build the websocket URL for the streaming channel.
    ///
    /// The vendor authenticates the upgrade via query parameters:
    /// `?locationId={id}&token=Bearer {token}`.
    pub fn stream_url(&self, token: &str, location_id: &str) -> Result<Url, Error> {
        let mut url = self.stream_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::StreamConnect(format!("unsupported scheme in {url}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("locationId", location_id)
            .append_pair("token", &format!("Bearer {token}"));
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, token: &str) -> Result<T, Error> {
        debug!(%url, "GET");

        let resp = self.http.get(url).bearer_auth(token).send().await?;

        match resp.status().as_u16() {
            200 => parse_body(resp).await,
            401 | 403 => Err(Error::Authentication {
                message: format!("token rejected with status {}", resp.status()),
            }),
            status => Err(api_error(status, resp).await),
        }
    }
}

/// Deserialize a response body, keeping the raw text for diagnostics
/// when the shape does not match.
async fn parse_body<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

async fn api_error(status: u16, resp: reqwest::Response) -> Error {
    let message = resp.text().await.unwrap_or_default();
    Error::Api { status, message }
}
