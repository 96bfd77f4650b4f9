//! In-process WebSocket test harness.
//!
//! Drives an axum/tower handler through a real HTTP upgrade and WebSocket
//! session without sockets: a [`net::pipe`] endpoint pair stands in for the
//! TCP connection, hyper serves the handler side on a spawned task, and
//! tokio-tungstenite dials from the caller's task.
//!
//! ```no_run
//! # async fn demo(router: axum::Router) -> Result<(), wstest::ConnectError> {
//! let mut conn = wstest::Client::new().connect(router, "ws://example.org/ws").await?;
//! conn.send_text("hello").await.map_err(wstest::ConnectError::Dial)?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod http;
pub mod net;
pub mod observability;

pub use config::HarnessConfig;
pub use http::{Client, ConnectError, Connection};
pub use net::{pair, Endpoint};
