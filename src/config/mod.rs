//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or HarnessConfig::default()
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HarnessConfig (validated, immutable)
//!     → handed to Client, copied into each endpoint pair
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_toml_str, load_config, ConfigError};
pub use schema::{EndpointConfig, HarnessConfig, LoggingConfig, ServerConfig};
