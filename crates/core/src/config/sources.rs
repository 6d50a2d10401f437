use crate::config::ConfigError;
use std::env;
use std::str::FromStr;

/// Configuration source information for debugging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default(String),
    /// Value loaded from file
    File(String),
    /// Value provided programmatically
    Programmatic,
}

impl ConfigSource {
    /// Check if source is environment variable
    pub fn is_env_var(&self) -> bool {
        matches!(self, ConfigSource::EnvVar(_))
    }

    /// Check if source is default value
    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default(_))
    }

    /// Check if source is from file
    pub fn is_file(&self) -> bool {
        matches!(self, ConfigSource::File(_))
    }

    /// Get source description
    pub fn description(&self) -> String {
        match self {
            ConfigSource::EnvVar(var) => format!("Environment variable: {}", var),
            ConfigSource::Default(value) => format!("Default value: {}", value),
            ConfigSource::File(path) => format!("Configuration file: {}", path),
            ConfigSource::Programmatic => "Programmatically set".to_string(),
        }
    }

    /// Source of a field that is read from `var` and falls back to `default`
    pub fn env_or_default(var: &str, default: impl Into<String>) -> Self {
        if env::var(var).is_ok() {
            ConfigSource::EnvVar(var.to_string())
        } else {
            ConfigSource::Default(default.into())
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Read a non-empty environment variable
pub fn env_string(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse an environment variable.
///
/// An unset variable yields `Ok(None)`; a set but unparsable one is an
/// `InvalidValue` error naming `field`.
pub fn env_parse<T: FromStr>(
    var: &str,
    field: &str,
    expected: &str,
) -> Result<Option<T>, ConfigError> {
    match env_string(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid_value(field, raw, expected)),
        None => Ok(None),
    }
}

/// Read a boolean environment variable (`true/false`, `1/0`, `yes/no`, `on/off`)
pub fn env_bool(var: &str, field: &str) -> Result<Option<bool>, ConfigError> {
    match env_string(var) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid_value(field, raw, "a boolean")),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_parse() {
        env::set_var("STRATA_TEST_NUMBER", "42");
        let value: Option<usize> = env_parse("STRATA_TEST_NUMBER", "number", "integer").unwrap();
        assert_eq!(value, Some(42));

        env::set_var("STRATA_TEST_NUMBER", "forty-two");
        let result: Result<Option<usize>, _> = env_parse("STRATA_TEST_NUMBER", "number", "integer");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        env::remove_var("STRATA_TEST_NUMBER");
        let value: Option<usize> = env_parse("STRATA_TEST_NUMBER", "number", "integer").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    #[serial]
    fn test_env_bool() {
        env::set_var("STRATA_TEST_FLAG", "yes");
        assert_eq!(env_bool("STRATA_TEST_FLAG", "flag").unwrap(), Some(true));

        env::set_var("STRATA_TEST_FLAG", "off");
        assert_eq!(env_bool("STRATA_TEST_FLAG", "flag").unwrap(), Some(false));

        env::set_var("STRATA_TEST_FLAG", "maybe");
        assert!(env_bool("STRATA_TEST_FLAG", "flag").is_err());

        env::remove_var("STRATA_TEST_FLAG");
        assert_eq!(env_bool("STRATA_TEST_FLAG", "flag").unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_source_tracking() {
        env::set_var("STRATA_TEST_SOURCE", "1");
        assert!(ConfigSource::env_or_default("STRATA_TEST_SOURCE", "0").is_env_var());
        env::remove_var("STRATA_TEST_SOURCE");

        let source = ConfigSource::env_or_default("STRATA_TEST_SOURCE", "0");
        assert!(source.is_default());
        assert_eq!(source.to_string(), "Default value: 0");
    }
}
