//! Core Data Source Traits
//!
//! This module defines the row source contract the exporters consume: a data
//! source that runs statements and returns rows with named, nullable columns.
//! Absence of a value is a first-class outcome; every typed read reports it as
//! `None` rather than as an error.

use crate::error::{ExportError, ExportResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Abstract data source the export engine reads from
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Execute a query and return the result rows
    async fn fetch_all(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> ExportResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a statement and return affected rows count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<u64>;

    /// Get the SQL dialect statements must be rendered in
    fn dialect(&self) -> SqlDialect;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name; unknown columns are a `Column` error
    fn get_by_name(&self, name: &str) -> ExportResult<DatabaseValue>;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Check whether the row carries a column
    fn has_column(&self, name: &str) -> bool {
        self.column_names().iter().any(|column| column == name)
    }
}

/// Typed, absence-aware column access for rows
pub trait DatabaseRowExt {
    /// Get an optional typed value; NULL and missing columns both yield `None`
    fn try_get<T>(&self, column: &str) -> ExportResult<Option<T>>
    where
        T: for<'de> Deserialize<'de>;

    /// Get a typed value that must be present
    fn get<T>(&self, column: &str) -> ExportResult<T>
    where
        T: for<'de> Deserialize<'de>;

    /// Non-null probe without interpreting the value
    fn is_null(&self, column: &str) -> bool;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn try_get<T>(&self, column: &str) -> ExportResult<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.has_column(column) {
            return Ok(None);
        }

        let db_value = self.get_by_name(column)?;
        if db_value.is_null() {
            return Ok(None);
        }

        serde_json::from_value(db_value.to_json())
            .map(Some)
            .map_err(|e| ExportError::column(column, format!("failed to deserialize: {}", e)))
    }

    fn get<T>(&self, column: &str) -> ExportResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.try_get(column)?
            .ok_or_else(|| ExportError::column(column, "value is absent"))
    }

    fn is_null(&self, column: &str) -> bool {
        match self.get_by_name(column) {
            Ok(value) => value.is_null(),
            Err(_) => true,
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view used for identifier columns
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for a zero-based parameter index
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Column type used for identifier columns of side tables
    pub fn identifier_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "BIGINT",
            SqlDialect::SQLite => "INTEGER",
        }
    }
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(SqlDialect::PostgreSQL),
            "sqlite" => Ok(SqlDialect::SQLite),
            _ => Err(format!("Unsupported SQL dialect: {}", s)),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::PostgreSQL => write!(f, "postgresql"),
            SqlDialect::SQLite => write!(f, "sqlite"),
        }
    }
}
