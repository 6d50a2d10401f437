//! Error types for the export engine
//!
//! Fatal conditions (mapping mistakes, data source failures, escalated row
//! issues) surface as [`ExportError`]. Non-fatal row problems are routed
//! through [`crate::reporting::ErrorReporter`] instead.

use strata_core::ConfigError;
use thiserror::Error;

/// Result type alias for export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// Error types for export operations
#[derive(Error, Debug, Clone)]
pub enum ExportError {
    /// Inconsistent mapping or invalid configuration, raised at construction time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Data source connection or I/O failure
    #[error("Database error: {0}")]
    Database(String),

    /// Query building or execution error
    #[error("Query error: {0}")]
    Query(String),

    /// A column could not be read or converted
    #[error("Column '{column}': {message}")]
    Column { column: String, message: String },

    /// Row carries a type id outside the supported set
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A reported issue was escalated by the error policy
    #[error("Export aborted: {0}")]
    Aborted(String),

    /// Flushing batch queues kept producing new requests
    #[error("Batch flush did not settle after {rounds} rounds ({pending} requests still pending)")]
    FlushLimit { rounds: usize, pending: usize },
}

impl ExportError {
    /// Create a column error
    pub fn column(column: impl Into<String>, message: impl Into<String>) -> Self {
        ExportError::Column {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Whether the error must end the job regardless of error policy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExportError::Configuration(_)
                | ExportError::Database(_)
                | ExportError::Aborted(_)
                | ExportError::FlushLimit { .. }
        )
    }
}

impl From<sqlx::Error> for ExportError {
    fn from(err: sqlx::Error) -> Self {
        ExportError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ExportError::Database("connection reset".into()).is_fatal());
        assert!(ExportError::Configuration("bad join".into()).is_fatal());
        assert!(!ExportError::UnsupportedType("type 99".into()).is_fatal());
        assert!(!ExportError::column("gmlid", "not a string").is_fatal());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ExportError = ConfigError::validation_failed("batch_size must be positive").into();
        assert!(matches!(err, ExportError::Configuration(ref msg) if msg.contains("batch_size")));
    }

    #[test]
    fn test_display() {
        let err = ExportError::FlushLimit { rounds: 3, pending: 7 };
        assert_eq!(
            err.to_string(),
            "Batch flush did not settle after 3 rounds (7 requests still pending)"
        );
    }
}
