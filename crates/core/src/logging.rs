//! Structured logging setup.
//!
//! Export jobs log through `tracing`; binaries and test harnesses call
//! [`init_logging`] once to install a subscriber. `RUST_LOG` takes
//! precedence over the configured filter.

use crate::config::Environment;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Environment filter (e.g. "strata_export=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Logging configuration suited to an environment
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                level: "info".to_string(),
                json_format: true,
                include_location: false,
                env_filter: Some("strata_export=info,sqlx=warn".to_string()),
            },
            Environment::Development => Self {
                level: "debug".to_string(),
                json_format: false,
                include_location: true,
                env_filter: Some("strata_export=debug,sqlx=info".to_string()),
            },
            Environment::Testing => Self {
                level: "error".to_string(),
                json_format: false,
                include_location: false,
                env_filter: None,
            },
        }
    }

    /// Set the level filter
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Switch JSON output on or off
    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
        let directives = self.env_filter.as_deref().unwrap_or(&self.level);
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, so repeated
/// calls from tests are harmless.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let filter = config.filter()?;

    let installed = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .json(),
            )
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(
            target: "strata::logging",
            "Logging initialized (level: {}, format: {})",
            config.level,
            if config.json_format { "JSON" } else { "text" }
        );
    }

    Ok(installed)
}
