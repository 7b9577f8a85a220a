// ── Gateway contract ──
//
// The external-collaborator seam: everything the core needs from the
// vendor API, as a trait so lifecycle logic can be exercised against
// scripted fakes. Futures are declared `+ Send` explicitly because the
// connection manager and scheduler call these from spawned tasks.

use std::future::Future;

use secrecy::{ExposeSecret, SecretString};

use vigil_api::error::Error as ApiError;
use vigil_api::{EventStream, GatewayClient, StateDocument, StreamEvent, TokenGrant};

/// One streaming connection attempt: a lazy, unbounded sequence of
/// events until the peer drops.
pub trait EventSource: Send + 'static {
    /// Next event, `None` on clean close, `Some(Err(_))` on transport
    /// failure. Either terminal outcome ends this source for good --
    /// a fresh connection is a fresh `EventSource`.
    fn next_event(&mut self) -> impl Future<Output = Option<Result<StreamEvent, ApiError>>> + Send;

    /// Close the connection; must not block beyond a bounded wait.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// The remote gateway: login, refresh, snapshot fetch, stream open.
///
/// Ordinary HTTP failures come back as typed errors, never panics.
pub trait Gateway: Send + Sync + 'static {
    type Stream: EventSource;

    fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> impl Future<Output = Result<TokenGrant, ApiError>> + Send;

    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenGrant, ApiError>> + Send;

    fn fetch_snapshot(
        &self,
        token: &str,
        location_id: &str,
    ) -> impl Future<Output = Result<StateDocument, ApiError>> + Send;

    fn open_stream(
        &self,
        token: &str,
        location_id: &str,
    ) -> impl Future<Output = Result<Self::Stream, ApiError>> + Send;
}

// ── Production impls ─────────────────────────────────────────────────

impl EventSource for EventStream {
    fn next_event(&mut self) -> impl Future<Output = Option<Result<StreamEvent, ApiError>>> + Send {
        EventStream::next_event(self)
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        EventStream::close(self)
    }
}

impl Gateway for GatewayClient {
    type Stream = EventStream;

    fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> impl Future<Output = Result<TokenGrant, ApiError>> + Send {
        GatewayClient::login(self, username, password.expose_secret())
    }

    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenGrant, ApiError>> + Send {
        GatewayClient::refresh(self, refresh_token)
    }

    fn fetch_snapshot(
        &self,
        token: &str,
        location_id: &str,
    ) -> impl Future<Output = Result<StateDocument, ApiError>> + Send {
        GatewayClient::fetch_snapshot(self, token, location_id)
    }

    fn open_stream(
        &self,
        token: &str,
        location_id: &str,
    ) -> impl Future<Output = Result<EventStream, ApiError>> + Send {
        let url = self.stream_url(token, location_id);
        let token = token.to_owned();
        async move { EventStream::connect(url?, &token).await }
    }
}
