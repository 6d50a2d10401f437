//! # strata-core
//!
//! Foundation shared by the strata crates: configuration primitives
//! (environment detection, typed environment variable access, file loading,
//! source tracking for debugging) and structured logging setup.

pub mod config;
pub mod logging;

pub use config::{AppConfigTrait, ConfigError, ConfigSource, Environment};
pub use logging::{init_logging, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
