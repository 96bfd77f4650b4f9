//! WebSocket accept over a hijacked endpoint.
//!
//! # Responsibilities
//! - Check that a request asks for a WebSocket upgrade
//! - Answer with the `101` response tungstenite's client expects
//! - Wrap the hijacked endpoint in a server-role `WebSocketStream`
//!
//! # Design Decisions
//! - The handler ends up with `WebSocketStream<Endpoint>`, the same type the
//!   dialer holds, so both sides of a test speak tokio-tungstenite
//! - axum's own `WebSocketUpgrade` works too; this variant exists for tests
//!   that want the raw endpoint underneath

use std::future::Future;

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::http::hijack::{Hijack, HijackRejection};
use crate::net::pipe::Endpoint;

/// Why a request could not be upgraded to a WebSocket.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeRejection {
    #[error("websocket handshake must use GET")]
    MethodNotGet,

    #[error("websocket handshake is missing the {0:?} token")]
    MissingToken(&'static str),

    #[error("websocket handshake does not offer version 13")]
    UnsupportedVersion,

    #[error("websocket handshake has no valid Sec-WebSocket-Key")]
    MissingKey,

    #[error(transparent)]
    NotUpgradable(#[from] HijackRejection),
}

impl IntoResponse for UpgradeRejection {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            UpgradeRejection::MethodNotGet => StatusCode::METHOD_NOT_ALLOWED,
            UpgradeRejection::NotUpgradable(_) => StatusCode::UPGRADE_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Extractor accepting a WebSocket handshake by hijacking the endpoint.
pub struct HijackUpgrade {
    hijack: Hijack,
    accept: HeaderValue,
}

fn header_has_token(headers: &HeaderMap, name: header::HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

impl<S> FromRequestParts<S> for HijackUpgrade
where
    S: Send + Sync,
{
    type Rejection = UpgradeRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.method != Method::GET {
            return Err(UpgradeRejection::MethodNotGet);
        }
        if !header_has_token(&parts.headers, header::CONNECTION, "upgrade") {
            return Err(UpgradeRejection::MissingToken("upgrade"));
        }
        if !header_has_token(&parts.headers, header::UPGRADE, "websocket") {
            return Err(UpgradeRejection::MissingToken("websocket"));
        }
        if !header_has_token(&parts.headers, header::SEC_WEBSOCKET_VERSION, "13") {
            return Err(UpgradeRejection::UnsupportedVersion);
        }
        let key = parts
            .headers
            .get(header::SEC_WEBSOCKET_KEY)
            .ok_or(UpgradeRejection::MissingKey)?;
        let accept = HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
            .map_err(|_| UpgradeRejection::MissingKey)?;

        let hijack = Hijack::from_request_parts(parts, state).await?;
        Ok(Self { hijack, accept })
    }
}

impl HijackUpgrade {
    /// Return the `101` response and run `f` with the server-side socket.
    pub fn on_upgrade<F, Fut>(self, f: F) -> Response<Body>
    where
        F: FnOnce(WebSocketStream<Endpoint>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hijack.on_hijack(move |hijacked| async move {
            let ws = WebSocketStream::from_raw_socket(hijacked.into_endpoint(), Role::Server, None).await;
            f(ws).await;
        });

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, self.accept);
        response
    }
}
