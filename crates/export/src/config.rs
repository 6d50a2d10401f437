//! Export job configuration

use crate::backends::SqlDialect;
use crate::reporting::ErrorPolicy;
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::collections::HashMap;
use strata_core::config::{env_bool, env_parse, env_string, validate_log_level};
use strata_core::{AppConfigTrait, ConfigError, ConfigSource, LoggingConfig};

/// How appearances are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppearanceMode {
    /// Per feature, deduplicated within the feature
    #[default]
    Local,
    /// Once per job, fetched through the side table at the end of the job
    Global,
}

impl std::str::FromStr for AppearanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AppearanceMode::Local),
            "global" => Ok(AppearanceMode::Global),
            _ => Err(format!("Unknown appearance mode: {}", s)),
        }
    }
}

/// Configuration of one export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[builder]
pub struct ExportConfig {
    /// Fixed number of identifiers per bulk statement
    #[builder(default = "100", getter)]
    pub batch_size: usize,

    /// Padding identifier for bulk statements; must never match a row
    #[builder(default = "0", getter)]
    pub sentinel_id: i64,

    /// Upper bound on coordinator flush rounds per page
    #[builder(default = "8", getter)]
    pub max_flush_rounds: usize,

    /// Handling of non-fatal row issues
    #[builder(default = "ErrorPolicy::LogAndContinue", getter)]
    pub error_policy: ErrorPolicy,

    /// Dialect statements are rendered in
    #[builder(default = "SqlDialect::PostgreSQL", getter)]
    pub dialect: SqlDialect,

    #[builder(default = "AppearanceMode::Local", getter)]
    pub appearance_mode: AppearanceMode,

    /// Temporary table collecting global appearance targets
    #[builder(default = "\"strata_global_targets\".to_string()", getter)]
    pub side_table_name: String,

    #[builder(default = "\"info\".to_string()", getter)]
    pub log_level: String,

    #[builder(default = "false", getter)]
    pub json_logs: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sentinel_id: 0,
            max_flush_rounds: 8,
            error_policy: ErrorPolicy::LogAndContinue,
            dialect: SqlDialect::PostgreSQL,
            appearance_mode: AppearanceMode::Local,
            side_table_name: "strata_global_targets".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ExportConfig {
    /// Logging setup matching this configuration
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.log_level.clone())
            .with_json(self.json_logs)
    }
}

impl AppConfigTrait for ExportConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = ExportConfig::default();

        let config = ExportConfig {
            batch_size: env_parse("STRATA_BATCH_SIZE", "batch_size", "a positive integer")?
                .unwrap_or(defaults.batch_size),
            sentinel_id: env_parse("STRATA_SENTINEL_ID", "sentinel_id", "an integer")?
                .unwrap_or(defaults.sentinel_id),
            max_flush_rounds: env_parse("STRATA_MAX_FLUSH_ROUNDS", "max_flush_rounds", "a positive integer")?
                .unwrap_or(defaults.max_flush_rounds),
            error_policy: env_parse("STRATA_ERROR_POLICY", "error_policy", "log_and_continue or abort")?
                .unwrap_or(defaults.error_policy),
            dialect: env_parse("STRATA_DIALECT", "dialect", "postgresql or sqlite")?
                .unwrap_or(defaults.dialect),
            appearance_mode: env_parse("STRATA_APPEARANCE_MODE", "appearance_mode", "local or global")?
                .unwrap_or(defaults.appearance_mode),
            side_table_name: env_string("STRATA_SIDE_TABLE").unwrap_or(defaults.side_table_name),
            log_level: env_string("STRATA_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env_bool("STRATA_JSON_LOGS", "json_logs")?.unwrap_or(defaults.json_logs),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "batch_size",
                self.batch_size.to_string(),
                "a positive integer",
            ));
        }

        if self.sentinel_id > 0 {
            return Err(ConfigError::invalid_value(
                "sentinel_id",
                self.sentinel_id.to_string(),
                "zero or a negative integer (row identifiers are positive)",
            ));
        }

        if self.max_flush_rounds == 0 {
            return Err(ConfigError::invalid_value(
                "max_flush_rounds",
                self.max_flush_rounds.to_string(),
                "a positive integer",
            ));
        }

        let valid_table = !self.side_table_name.is_empty()
            && self
                .side_table_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !self.side_table_name.starts_with(|c: char| c.is_ascii_digit());
        if !valid_table {
            return Err(ConfigError::invalid_value(
                "side_table_name",
                self.side_table_name.clone(),
                "a plain SQL identifier",
            ));
        }

        validate_log_level("log_level", &self.log_level)?;

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let defaults = ExportConfig::default();
        let mut sources = HashMap::new();
        sources.insert(
            "batch_size".to_string(),
            ConfigSource::env_or_default("STRATA_BATCH_SIZE", defaults.batch_size.to_string()),
        );
        sources.insert(
            "sentinel_id".to_string(),
            ConfigSource::env_or_default("STRATA_SENTINEL_ID", defaults.sentinel_id.to_string()),
        );
        sources.insert(
            "max_flush_rounds".to_string(),
            ConfigSource::env_or_default("STRATA_MAX_FLUSH_ROUNDS", defaults.max_flush_rounds.to_string()),
        );
        sources.insert(
            "error_policy".to_string(),
            ConfigSource::env_or_default("STRATA_ERROR_POLICY", defaults.error_policy.to_string()),
        );
        sources.insert(
            "dialect".to_string(),
            ConfigSource::env_or_default("STRATA_DIALECT", defaults.dialect.to_string()),
        );
        sources.insert(
            "appearance_mode".to_string(),
            ConfigSource::env_or_default("STRATA_APPEARANCE_MODE", "local"),
        );
        sources.insert(
            "side_table_name".to_string(),
            ConfigSource::env_or_default("STRATA_SIDE_TABLE", defaults.side_table_name),
        );
        sources.insert(
            "log_level".to_string(),
            ConfigSource::env_or_default("STRATA_LOG_LEVEL", defaults.log_level),
        );
        sources.insert(
            "json_logs".to_string(),
            ConfigSource::env_or_default("STRATA_JSON_LOGS", "false"),
        );
        sources
    }
}

impl ExportConfigBuilder {
    /// Small batches and verbose logging
    pub fn development() -> Self {
        ExportConfigBuilder::new()
            .batch_size(20)
            .log_level("debug".to_string())
    }

    /// Large batches, JSON logs and a generous flush bound
    pub fn production() -> Self {
        ExportConfigBuilder::new()
            .batch_size(1000)
            .max_flush_rounds(16)
            .json_logs(true)
    }

    /// Tiny batches so chunking is exercised, and strict error handling
    pub fn testing() -> Self {
        ExportConfigBuilder::new()
            .batch_size(4)
            .error_policy(ErrorPolicy::Abort)
            .log_level("warn".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in [
            "STRATA_BATCH_SIZE",
            "STRATA_SENTINEL_ID",
            "STRATA_MAX_FLUSH_ROUNDS",
            "STRATA_ERROR_POLICY",
            "STRATA_DIALECT",
            "STRATA_APPEARANCE_MODE",
            "STRATA_SIDE_TABLE",
            "STRATA_LOG_LEVEL",
            "STRATA_JSON_LOGS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.sentinel_id, 0);
        assert_eq!(config.error_policy, ErrorPolicy::LogAndContinue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_defaults_and_overrides() {
        let config = ExportConfigBuilder::new()
            .batch_size(25)
            .build()
            .expect("Failed to build config");

        assert_eq!(*config.get_batch_size(), 25);
        assert_eq!(*config.get_max_flush_rounds(), 8);
        assert_eq!(config.side_table_name, "strata_global_targets");
    }

    #[test]
    fn test_presets() {
        let testing = ExportConfigBuilder::testing().build().expect("Failed to build config");
        assert_eq!(testing.batch_size, 4);
        assert_eq!(testing.error_policy, ErrorPolicy::Abort);

        let production = ExportConfigBuilder::production()
            .build()
            .expect("Failed to build config");
        assert!(production.json_logs);
        assert!(production.logging_config().json_format);
    }

    #[test]
    fn test_validation() {
        let mut config = ExportConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ExportConfig::default();
        config.sentinel_id = 5;
        assert!(config.validate().is_err());

        let mut config = ExportConfig::default();
        config.side_table_name = "targets; DROP TABLE x".to_string();
        assert!(config.validate().is_err());

        let mut config = ExportConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var("STRATA_BATCH_SIZE", "50");
        std::env::set_var("STRATA_ERROR_POLICY", "abort");
        std::env::set_var("STRATA_APPEARANCE_MODE", "global");
        std::env::set_var("STRATA_JSON_LOGS", "yes");

        let config = ExportConfig::from_env().unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.appearance_mode, AppearanceMode::Global);
        assert!(config.json_logs);

        let sources = config.config_sources();
        assert!(sources["batch_size"].is_env_var());
        assert!(sources["sentinel_id"].is_default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_env();
        std::env::set_var("STRATA_BATCH_SIZE", "many");
        assert!(matches!(
            ExportConfig::from_env(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "batch_size"
        ));

        std::env::set_var("STRATA_BATCH_SIZE", "0");
        assert!(ExportConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch_size: 10\nerror_policy: abort\ndialect: postgresql").unwrap();

        let config = ExportConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.max_flush_rounds, 8);

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        writeln!(invalid, "batch_size: 0").unwrap();
        assert!(ExportConfig::from_yaml_file(invalid.path()).is_err());
    }
}
