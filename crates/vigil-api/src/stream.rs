//! Single websocket connection to the streaming endpoint.
//!
//! One [`EventStream`] is one connection attempt: connect, read parsed
//! events until the peer drops, then discard. Reconnect policy lives in
//! the core's connection manager, not here -- the transport performs no
//! retries of its own, so there is exactly one retry mechanism in the
//! system.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::model::StreamEvent;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection to the streaming endpoint.
pub struct EventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl EventStream {
    /// Connect and complete the websocket handshake.
    ///
    /// The token rides both in the URL query (vendor requirement) and as
    /// an `Authorization` header on the upgrade request. The handshake is
    /// bounded by a fixed timeout.
    pub async fn connect(url: Url, token: &str) -> Result<Self, Error> {
        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::StreamConnect(e.to_string()))?;

        let request =
            ClientRequestBuilder::new(uri).with_header("Authorization", format!("Bearer {token}"));

        let handshake = tokio_tungstenite::connect_async(request);
        let (ws, _response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| Error::StreamConnect("connect timeout".into()))?
            .map_err(|e| Error::StreamConnect(e.to_string()))?;

        Ok(Self { ws })
    }

    /// Read the next event from the connection.
    ///
    /// Returns `None` on a clean close (close frame or stream end) and
    /// `Some(Err(_))` on a transport error; either way the stream is done.
    /// Unparseable text frames are logged and skipped.
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, Error>> {
        loop {
            match self.ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<StreamEvent>(&text) {
                        Ok(event) => return Some(Ok(event)),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable stream frame");
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite queues the pong reply automatically
                    tracing::trace!("stream ping");
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::debug!(code = %cf.code, reason = %cf.reason, "close frame received");
                    }
                    return None;
                }
                Some(Ok(_)) => {
                    // Binary, Pong, Frame -- ignore
                }
                Some(Err(e)) => return Some(Err(Error::StreamClosed(e.to_string()))),
                None => return None,
            }
        }
    }

    /// Close the connection, bounded by a fixed timeout.
    ///
    /// A peer that never acknowledges the close frame must not block
    /// shutdown -- on timeout the connection is simply dropped.
    pub async fn close(&mut self) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.ws.close(None)).await;
    }
}
