//! Dial side of the harness.
//!
//! # Responsibilities
//! - Create an endpoint pair per connect
//! - Spawn the handler side on the server end
//! - Run the tokio-tungstenite client handshake over the client end
//! - Report refused handshakes and broken requests as errors
//!
//! # Data Flow
//! ```text
//! Client::connect(service, url)
//!     → pair_with()            (client end, server end)
//!     → tokio::spawn(serve_endpoint(server end, service))
//!     → client_async(url, client end)
//!         ├─ 101 → Connection (live WebSocket over the client end)
//!         └─ other → close client end, join server task, ConnectError
//! ```

use std::ops::{Deref, DerefMut};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Response as HandshakeResponse;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tower::Service;
use url::Url;

use crate::config::HarnessConfig;
use crate::http::server::{serve_endpoint, BoxError, ServeError};
use crate::net::pipe::{is_closed_pipe, pair_with, Endpoint};
use crate::observability::LogHook;

/// Error type for connect attempts.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The handshake was refused or could not run.
    #[error("websocket dial failed: {0}")]
    Dial(#[source] tungstenite::Error),

    /// The handler side could not parse what the dialer sent.
    #[error("malformed request: {0}")]
    MalformedRequest(#[source] hyper::Error),

    #[error("server connection failed: {0}")]
    Server(#[source] hyper::Error),

    #[error("server task failed: {0}")]
    ServerTask(#[from] tokio::task::JoinError),

    #[error("close failed: {0}")]
    Close(#[source] tungstenite::Error),
}

impl From<ServeError> for ConnectError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::MalformedRequest(e) => ConnectError::MalformedRequest(e),
            ServeError::Connection(e) => ConnectError::Server(e),
        }
    }
}

/// Connects WebSocket clients to in-process handlers.
///
/// Each [`Client::connect`] builds a fresh endpoint pair, so one client can
/// be reused for any number of connections.
#[derive(Debug, Clone, Default)]
pub struct Client {
    config: HarnessConfig,
    log: Option<LogHook>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        Self { config, log: None }
    }

    /// Send endpoint diagnostics to `log` as well as to `tracing`.
    pub fn with_logger<F>(mut self, log: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.log = Some(LogHook::new(log));
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Dial `url` against `service` and complete the WebSocket handshake.
    ///
    /// Only the path and query of `url` reach the handler; host and port are
    /// carried in the `Host` header and otherwise ignored. The scheme must be
    /// `ws` or `wss`. The handler runs on a spawned task, so this must be
    /// called from within a tokio runtime.
    pub async fn connect<S>(&self, service: S, url: &str) -> Result<Connection, ConnectError>
    where
        S: Service<Request<Incoming>, Response = Response<Body>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
    {
        let target = Url::parse(url).map_err(|source| ConnectError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let (client_end, server_end) = pair_with(&self.config, self.log.clone());
        let connection_id = client_end.id();
        tracing::debug!(connection_id = %connection_id, url = %target, "Connecting");

        let server = tokio::spawn(serve_endpoint(server_end, service, self.config.server.clone()));

        // On failure client_async drops the client end, which lets the
        // server task run to completion.
        match tokio_tungstenite::client_async(url, client_end).await {
            Ok((ws, response)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    status = %response.status(),
                    "Handshake complete"
                );
                Ok(Connection {
                    ws,
                    response,
                    server: Some(server),
                })
            }
            Err(err) => {
                tracing::debug!(connection_id = %connection_id, error = %err, "Handshake failed");
                match server.await? {
                    Err(ServeError::MalformedRequest(e)) => Err(ConnectError::MalformedRequest(e)),
                    Err(ServeError::Connection(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "Server side ended with error");
                        Err(ConnectError::Dial(err))
                    }
                    Ok(()) => Err(ConnectError::Dial(err)),
                }
            }
        }
    }

    /// Start the handler side and return the raw client end.
    ///
    /// For speaking HTTP by hand, e.g. requests no WebSocket client would send.
    pub fn dial_raw<S>(&self, service: S) -> RawSession
    where
        S: Service<Request<Incoming>, Response = Response<Body>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
    {
        let (client_end, server_end) = pair_with(&self.config, self.log.clone());
        let server = tokio::spawn(serve_endpoint(server_end, service, self.config.server.clone()));
        RawSession {
            endpoint: client_end,
            server,
        }
    }
}

/// A live WebSocket over the client end of a pair.
///
/// Derefs to the underlying [`WebSocketStream`], so `SinkExt`/`StreamExt`
/// work directly.
pub struct Connection {
    ws: WebSocketStream<Endpoint>,
    response: HandshakeResponse,
    server: Option<JoinHandle<Result<(), ServeError>>>,
}

impl Connection {
    /// The handler's `101` response.
    pub fn response(&self) -> &HandshakeResponse {
        &self.response
    }

    /// The client end under the WebSocket.
    pub fn endpoint(&self) -> &Endpoint {
        self.ws.get_ref()
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), tungstenite::Error> {
        self.ws.send(Message::text(text.to_owned())).await
    }

    /// Next data message as text, skipping control frames.
    ///
    /// Binary messages must be valid UTF-8. Returns `Ok(None)` at end of
    /// stream or on a close frame.
    pub async fn recv_text(&mut self) -> Result<Option<String>, tungstenite::Error> {
        while let Some(message) = self.ws.next().await {
            match message? {
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                data => return Ok(Some(data.into_text()?.as_str().to_owned())),
            }
        }
        Ok(None)
    }

    /// Whether the handler side has finished. It finishes shortly after the
    /// handshake, once hyper has handed the endpoint off.
    pub fn server_finished(&self) -> bool {
        self.server.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the handler side and report how it ended.
    pub async fn join_server(&mut self) -> Result<(), ConnectError> {
        match self.server.take() {
            Some(handle) => Ok(handle.await??),
            None => Ok(()),
        }
    }

    /// Send a close frame and close the client end.
    ///
    /// Idempotent. A peer that already went away is not an error.
    pub async fn close(&mut self) -> Result<(), ConnectError> {
        let result = match self.ws.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed)
            | Err(tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)) => Ok(()),
            Err(tungstenite::Error::Io(ref e)) if is_closed_pipe(e) => Ok(()),
            Err(err) => Err(ConnectError::Close(err)),
        };
        self.ws.get_ref().close();
        tracing::debug!(connection_id = %self.endpoint().id(), "Connection closed");
        result
    }

    pub fn into_inner(self) -> WebSocketStream<Endpoint> {
        self.ws
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", self.endpoint())
            .field("status", &self.response.status())
            .field("server_finished", &self.server_finished())
            .finish()
    }
}

impl Deref for Connection {
    type Target = WebSocketStream<Endpoint>;

    fn deref(&self) -> &Self::Target {
        &self.ws
    }
}

impl DerefMut for Connection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ws
    }
}

/// The client end of a pair whose server end is being served.
#[derive(Debug)]
pub struct RawSession {
    endpoint: Endpoint,
    server: JoinHandle<Result<(), ServeError>>,
}

impl RawSession {
    pub fn endpoint(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    /// Write `request` and read until the handler side closes.
    pub async fn round_trip(&mut self, request: &[u8]) -> std::io::Result<Vec<u8>> {
        self.endpoint.write_all(request).await?;
        let mut response = Vec::new();
        self.endpoint.read_to_end(&mut response).await?;
        Ok(response)
    }

    /// Close the client end and report how the handler side ended.
    pub async fn finish(self) -> Result<(), ConnectError> {
        let RawSession { endpoint, server } = self;
        endpoint.close();
        Ok(server.await??)
    }
}
