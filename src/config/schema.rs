//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the harness.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Root configuration for the test harness.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Placeholder addresses reported by the in-memory endpoints.
    pub endpoints: EndpointConfig,

    /// HTTP/1.1 server settings for the handler side.
    pub server: ServerConfig,

    /// Diagnostic logging settings.
    pub logging: LoggingConfig,
}

/// Addresses the endpoints report through `local_addr` / `peer_addr`.
///
/// Nothing is bound; these only show up in diagnostics and in
/// `ConnectInfo`-style lookups made by handlers.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Address of the dialing side.
    pub client_addr: SocketAddr,

    /// Address of the handler side.
    pub server_addr: SocketAddr,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            client_addr: SocketAddr::from(([127, 0, 0, 1], 49152)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 80)),
        }
    }
}

/// Handler-side HTTP/1.1 settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum bytes hyper buffers while reading a request head.
    pub max_buf_size: usize,

    /// Write response header names in Title-Case.
    pub title_case_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_buf_size: 400 * 1024,
            title_case_headers: false,
        }
    }
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Pass every written payload through the log hook, not just its size.
    pub trace_payloads: bool,
}
