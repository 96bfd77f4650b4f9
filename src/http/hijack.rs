//! Raw connection takeover for handlers.
//!
//! # Responsibilities
//! - Let an axum handler claim the server endpoint after its `101` response
//! - Return any bytes hyper read past the request head to the endpoint
//! - Offer a buffered reader/writer over the claimed endpoint
//!
//! # Data Flow
//! ```text
//! request with Upgrade header
//!     → Hijack extractor removes hyper's upgrade handle (one-shot)
//!     → handler returns switching_protocols(..) or its own 101
//!     → hyper writes the response and releases the IO
//!     → Hijack::hijack() downcasts it back to the in-memory Endpoint
//!     → handler owns the endpoint for the rest of the session
//! ```

use std::future::Future;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::BufStream;
use tokio::task::JoinHandle;

use crate::net::pipe::Endpoint;

/// Error returned when the upgraded connection cannot be claimed.
#[derive(Debug, thiserror::Error)]
pub enum HijackError {
    #[error("upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),

    #[error("upgraded connection is not an in-memory endpoint")]
    NotAnEndpoint,
}

/// Rejection for requests that cannot be hijacked.
#[derive(Debug, thiserror::Error)]
#[error("connection is not upgradable or was already taken")]
pub struct HijackRejection;

impl IntoResponse for HijackRejection {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::UPGRADE_REQUIRED, self.to_string()).into_response()
    }
}

/// Extractor granting exclusive ownership of the server endpoint.
///
/// Extraction takes hyper's upgrade handle out of the request, so a second
/// `Hijack` (or a `WebSocketUpgrade`) on the same request is rejected, and
/// [`Hijack::hijack`] consumes the extractor. Only requests that carry an
/// `Upgrade` header (or `CONNECT`) can be hijacked.
pub struct Hijack {
    on_upgrade: OnUpgrade,
}

impl<S> FromRequestParts<S> for Hijack
where
    S: Send + Sync,
{
    type Rejection = HijackRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let on_upgrade = parts
            .extensions
            .remove::<OnUpgrade>()
            .ok_or(HijackRejection)?;
        Ok(Self { on_upgrade })
    }
}

impl Hijack {
    /// Wait for hyper to finish the response and release the endpoint.
    ///
    /// Resolves only after the handler has returned its `101` response.
    pub async fn hijack(self) -> Result<Hijacked, HijackError> {
        let upgraded = self.on_upgrade.await?;
        let parts = upgraded
            .downcast::<TokioIo<Endpoint>>()
            .map_err(|_| HijackError::NotAnEndpoint)?;

        let endpoint = parts.io.into_inner();
        endpoint.unread(&parts.read_buf);
        tracing::debug!(
            connection_id = %endpoint.id(),
            buffered = parts.read_buf.len(),
            "Endpoint hijacked"
        );
        Ok(Hijacked { endpoint })
    }

    /// Run `f` on a new task once the endpoint is released.
    ///
    /// Mirrors axum's `WebSocketUpgrade::on_upgrade`: the handler returns its
    /// response right away and `f` takes over afterwards.
    ///
    /// `f` is never called if the hijack fails, for example when the handler
    /// answers something other than `101` or the dialer hangs up first. The
    /// failure is logged at `warn` and is also the output of the returned
    /// handle, which callers are free to drop.
    pub fn on_hijack<F, Fut>(self, f: F) -> JoinHandle<Result<(), HijackError>>
    where
        F: FnOnce(Hijacked) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            match self.hijack().await {
                Ok(hijacked) => {
                    f(hijacked).await;
                    Ok(())
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Hijack failed");
                    Err(err)
                }
            }
        })
    }
}

/// The server endpoint, now owned by the handler.
#[derive(Debug)]
pub struct Hijacked {
    endpoint: Endpoint,
}

impl Hijacked {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The raw endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        self.endpoint
    }

    /// The endpoint behind a buffered reader and writer.
    ///
    /// Writes sit in the buffer until flushed. The raw endpoint stays
    /// reachable through `get_ref`/`get_mut` (to close it, or to bypass the
    /// buffers) and `into_inner`. Reading through the raw endpoint skips
    /// whatever the reader half has already buffered.
    pub fn buffered(self) -> BufStream<Endpoint> {
        BufStream::new(self.endpoint)
    }
}

/// A bare `101 Switching Protocols` response naming `protocol`.
///
/// For handlers that hijack into a protocol of their own. WebSocket handlers
/// should let axum's `WebSocketUpgrade` or tungstenite build the response.
pub fn switching_protocols(protocol: &str) -> Result<Response<Body>, header::InvalidHeaderValue> {
    let protocol = HeaderValue::from_str(protocol)?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    response.headers_mut().insert(header::UPGRADE, protocol);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::pipe::pair;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn requests_without_upgrade_are_rejected() {
        let (mut parts, _) = Request::builder()
            .uri("/raw")
            .body(())
            .unwrap()
            .into_parts();

        let rejection = match Hijack::from_request_parts(&mut parts, &()).await {
            Ok(_) => panic!("plain request must not be hijackable"),
            Err(rejection) => rejection,
        };
        assert_eq!(
            rejection.into_response().status(),
            StatusCode::UPGRADE_REQUIRED
        );
    }

    #[test]
    fn switching_protocols_names_the_protocol() {
        let response = switching_protocols("echo").unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[header::UPGRADE], "echo");
        assert_eq!(response.headers()[header::CONNECTION], "upgrade");
    }

    #[test]
    fn invalid_protocol_names_are_errors() {
        assert!(switching_protocols("bad\nname").is_err());
    }

    #[tokio::test]
    async fn failed_hijack_skips_the_callback_and_reports_why() {
        let hijack = Hijack {
            on_upgrade: hyper::upgrade::on(Request::new(())),
        };
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let handle = hijack.on_hijack(move |_| async move { flag.store(true, Ordering::SeqCst) });
        let err = handle.await.unwrap().unwrap_err();

        assert!(matches!(err, HijackError::Upgrade(_)), "{err:?}");
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn buffered_stream_keeps_the_raw_endpoint_reachable() {
        let (mut client, server) = pair();
        let id = server.id();
        let mut stream = Hijacked { endpoint: server }.buffered();
        assert_eq!(stream.get_ref().id(), id);

        stream.write_all(b"held").await.unwrap();
        assert_eq!(client.buffered(), 0);
        stream.flush().await.unwrap();
        stream.get_ref().close();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"held");
        assert!(stream.into_inner().is_closed());
    }
}
