//! Shared test server for integration tests.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use wstest::http::{switching_protocols, Hijack, HijackUpgrade};
use wstest::Endpoint;

/// Messages exchanged per scenario.
#[allow(dead_code)]
pub const COUNT: usize = 20;

/// Router plus the server-side sockets it has accepted.
///
/// Like a plain handler it cannot tell connections apart; tests take
/// sockets off the channels in the order they connected.
pub struct TestServer {
    pub router: Router,
    /// Sockets upgraded on `/ws` through axum's `WebSocketUpgrade`.
    pub upgraded: mpsc::UnboundedReceiver<WebSocket>,
    /// Sockets upgraded on `/ws-hijack` through `HijackUpgrade`.
    pub hijacked: mpsc::UnboundedReceiver<WebSocketStream<Endpoint>>,
}

#[derive(Clone)]
struct AppState {
    upgraded: mpsc::UnboundedSender<WebSocket>,
    hijacked: mpsc::UnboundedSender<WebSocketStream<Endpoint>>,
}

/// Routes:
/// - `/ws`: WebSocket via axum
/// - `/ws-hijack`: WebSocket via a hijacked endpoint
/// - `/echo`: hijacks into a line protocol answering the first line upper-cased
/// - everything else: 404
pub fn test_server() -> TestServer {
    let (upgraded_tx, upgraded) = mpsc::unbounded_channel();
    let (hijacked_tx, hijacked) = mpsc::unbounded_channel();
    let state = AppState {
        upgraded: upgraded_tx,
        hijacked: hijacked_tx,
    };

    let router = Router::new()
        .route("/ws", get(upgrade))
        .route("/ws-hijack", get(hijack_upgrade))
        .route("/echo", get(echo))
        .with_state(state);

    TestServer {
        router,
        upgraded,
        hijacked,
    }
}

async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _ = state.upgraded.send(socket);
    })
}

async fn hijack_upgrade(State(state): State<AppState>, upgrade: HijackUpgrade) -> Response {
    upgrade.on_upgrade(move |ws| async move {
        let _ = state.hijacked.send(ws);
    })
}

async fn echo(hijack: Hijack) -> Response {
    hijack.on_hijack(|hijacked| async move {
        let mut stream = hijacked.buffered();
        let mut line = String::new();
        if stream.read_line(&mut line).await.is_ok() {
            let _ = stream.write_all(line.to_uppercase().as_bytes()).await;
            let _ = stream.flush().await;
        }
        stream.get_ref().close();
    });

    match switching_protocols("echo") {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
