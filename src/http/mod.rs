//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! client.rs  (tokio-tungstenite handshake over the client end)
//!     → bytes through net::pipe
//!     → server.rs (hyper HTTP/1.1 over the server end)
//!     → caller's axum Router / tower Service
//!         ├─ plain response → written, server end closed
//!         └─ 101 → hijack.rs / websocket.rs / axum WebSocketUpgrade
//!                  take the server end for the rest of the session
//! ```

pub mod client;
pub mod hijack;
pub mod server;
pub mod websocket;

pub use client::{Client, ConnectError, Connection, RawSession};
pub use hijack::{switching_protocols, Hijack, HijackError, HijackRejection, Hijacked};
pub use server::{serve_endpoint, ServeError};
pub use websocket::{HijackUpgrade, UpgradeRejection};
