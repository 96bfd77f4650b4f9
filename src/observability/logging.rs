//! Structured logging.
//!
//! # Responsibilities
//! - Initialize a tracing subscriber for tests
//! - Carry the optional per-client log hook into the endpoints
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging; the hook is an extra sink for
//!   callers that want lines in their own test output
//! - Log level configurable via `RUST_LOG`

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "wstest=debug";

/// A println-like sink for endpoint diagnostics.
///
/// Has no effect on the data path; every line is also emitted as a
/// `tracing` event.
#[derive(Clone)]
pub struct LogHook(Arc<dyn Fn(&str) + Send + Sync>);

impl LogHook {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn log(&self, line: &str) {
        (self.0)(line)
    }
}

impl fmt::Debug for LogHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogHook")
    }
}

/// Install a global subscriber writing through the test harness capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
