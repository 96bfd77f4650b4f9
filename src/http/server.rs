//! Handler-side HTTP/1.1 over an in-memory endpoint.
//!
//! # Responsibilities
//! - Parse the one request the dialer sends (hyper)
//! - Dispatch it to the caller's tower/axum service
//! - Write plain responses, then close the endpoint
//! - Hand the endpoint over when the handler upgrades (see `hijack`)
//! - Escalate unparsable requests instead of absorbing them

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tower::{Service, ServiceExt};

use crate::config::ServerConfig;
use crate::net::pipe::Endpoint;

/// Boxed error accepted from handler services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for the server task.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The bytes read off the endpoint were not a valid HTTP/1.1 request.
    #[error("malformed request: {0}")]
    MalformedRequest(#[source] hyper::Error),

    /// Anything else that ended the connection abnormally.
    #[error("server connection failed: {0}")]
    Connection(#[source] hyper::Error),
}

impl From<hyper::Error> for ServeError {
    fn from(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_too_large() {
            ServeError::MalformedRequest(err)
        } else {
            ServeError::Connection(err)
        }
    }
}

/// Mark every response except `101` as the last one on the connection.
///
/// The `101` must not carry `close`: tungstenite's client rejects it. That
/// rules out hyper's `keep_alive(false)`, which tags every response.
fn close_unless_upgrade(mut response: Response<Body>) -> Response<Body> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

/// Serve one HTTP/1.1 exchange over the server end of a pair.
///
/// Plain responses carry `Connection: close`, so hyper shuts the endpoint
/// down after writing them and the dialer reads end-of-stream. When the
/// handler answers `101` the endpoint is handed to whoever awaits the
/// upgrade and this returns. Also returns if the client end closes before
/// sending a request.
pub async fn serve_endpoint<S>(
    endpoint: Endpoint,
    service: S,
    config: ServerConfig,
) -> Result<(), ServeError>
where
    S: Service<Request<Incoming>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    let connection_id = endpoint.id();
    let peer_addr = endpoint.peer_addr();
    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Serving endpoint");

    let mut builder = http1::Builder::new();
    builder
        .max_buf_size(config.max_buf_size)
        .title_case_headers(config.title_case_headers);

    let service = service.map_response(close_unless_upgrade);
    let result = builder
        .serve_connection(TokioIo::new(endpoint), TowerToHyperService::new(service))
        .with_upgrades()
        .await;

    match result {
        Ok(()) => {
            tracing::debug!(connection_id = %connection_id, "Server side finished");
            Ok(())
        }
        Err(err) => {
            let err = ServeError::from(err);
            match &err {
                ServeError::MalformedRequest(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "Malformed request")
                }
                ServeError::Connection(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Server connection error")
                }
            }
            Err(err)
        }
    }
}
