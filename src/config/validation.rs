//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (hyper rejects tiny read buffers)
//! - Detect endpoints that would report the same address
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HarnessConfig → Result<(), Vec<ValidationError>>

use crate::config::schema::HarnessConfig;

/// Smallest read buffer hyper accepts for an HTTP/1.1 connection.
pub const MIN_BUF_SIZE: usize = 8192;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server.max_buf_size must be at least {min}, got {0}", min = MIN_BUF_SIZE)]
    BufferTooSmall(usize),

    #[error("endpoints.client_addr and endpoints.server_addr are both {0}")]
    DuplicateAddress(std::net::SocketAddr),
}

/// Check a configuration, collecting every error found.
pub fn validate_config(config: &HarnessConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.max_buf_size < MIN_BUF_SIZE {
        errors.push(ValidationError::BufferTooSmall(config.server.max_buf_size));
    }

    if config.endpoints.client_addr == config.endpoints.server_addr {
        errors.push(ValidationError::DuplicateAddress(config.endpoints.client_addr));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
