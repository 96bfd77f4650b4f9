//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net::pipe, http::server, http::client produce:
//!     → tracing events (connection_id, role, bytes, status)
//!     → LogHook lines, when a client was built with_logger
//!
//! Consumers:
//!     → test output via init_test_logging()
//!     → whatever the hook forwards to
//! ```

pub mod logging;

pub use logging::{init_test_logging, LogHook};
