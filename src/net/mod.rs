//! Network layer subsystem, in memory.
//!
//! # Data Flow
//! ```text
//! pipe::pair_with()
//!     → Endpoint (client) ──write──▶ server queue ──read──▶ Endpoint (server)
//!     ← Endpoint (client) ◀──read── client queue ◀──write── Endpoint (server)
//!
//! Endpoint lifecycle:
//!     Open → Closed (self)        writes and own reads fail
//!     Open → peer Closed          reads drain, then end-of-stream
//! ```
//!
//! # Design Decisions
//! - Endpoints implement tokio's AsyncRead/AsyncWrite, so hyper and
//!   tokio-tungstenite run over them unchanged
//! - connection.rs tags both ends with a shared ID for tracing

pub mod connection;
pub mod pipe;

pub use connection::{ConnectionId, Role};
pub use pipe::{is_closed_pipe, pair, pair_with, Endpoint, PipeError};
