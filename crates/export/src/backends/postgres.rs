//! PostgreSQL Data Source
//!
//! A [`DataSource`] over one dedicated pooled connection. An export job keeps
//! its connection for its whole lifetime so session-scoped temporary tables
//! (the global appearance side table) stay visible to later bulk queries.

use super::core::*;
use crate::error::{ExportError, ExportResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{pool::PoolConnection, postgres::PgPoolOptions, Column, Pool, Postgres, Row as SqlxRow};
use std::sync::Arc;
use tokio::sync::Mutex;

/// PostgreSQL data source holding one connection for the duration of a job
pub struct PostgresSource {
    conn: Mutex<PoolConnection<Postgres>>,
}

impl PostgresSource {
    /// Acquire a dedicated connection from an existing pool
    pub async fn acquire(pool: &Pool<Postgres>) -> ExportResult<Self> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| ExportError::Database(format!("Failed to acquire connection: {}", e)))?;

        tracing::debug!("Export connection acquired (pool size: {}, idle: {})", pool.size(), pool.num_idle());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a pool for `database_url` with up to `max_connections` connections
    pub async fn create_pool(database_url: &str, max_connections: u32) -> ExportResult<Arc<Pool<Postgres>>> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(ExportError::Configuration(
                "Invalid PostgreSQL URL scheme".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create database pool: {}", e);
                ExportError::Database(format!("Failed to create PostgreSQL pool: {}", e))
            })?;

        tracing::info!("Database pool created with {} max connections", max_connections);
        Ok(Arc::new(pool))
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<Vec<Box<dyn DatabaseRow>>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let mut conn = self.conn.lock().await;
        let rows = query
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| ExportError::Database(format!("Query fetch failed: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let mut conn = self.conn.lock().await;
        let result = query
            .execute(&mut **conn)
            .await
            .map_err(|e| ExportError::Database(format!("Statement execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: sqlx::postgres::PgRow,
}

impl PostgresRow {
    pub fn new(row: sqlx::postgres::PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_name(&self, name: &str) -> ExportResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| ExportError::column(name, "column not found"))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<i64>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Json(j) => query.bind(j.clone()),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &sqlx::postgres::PgRow, index: usize) -> ExportResult<DatabaseValue> {
    use sqlx::{TypeInfo, ValueRef};

    let column = &row.columns()[index];
    let column_name = column.name().to_string();
    let type_name = column.type_info().name().to_string();

    let raw = row
        .try_get_raw(index)
        .map_err(|e| ExportError::column(&column_name, e.to_string()))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let read_error = |e: sqlx::Error| ExportError::column(&column_name, format!("failed to read {}: {}", type_name, e));

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(read_error)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index).map_err(read_error)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(read_error)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(read_error)?),
        "FLOAT4" => DatabaseValue::Float64(f64::from(row.try_get::<f32, _>(index).map_err(read_error)?)),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(read_error)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index).map_err(read_error)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(read_error)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index).map_err(read_error)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index).map_err(read_error)?),
        "TIMESTAMP" => DatabaseValue::DateTime(
            row.try_get::<chrono::NaiveDateTime, _>(index)
                .map_err(read_error)?
                .and_utc(),
        ),
        "DATE" => DatabaseValue::Date(row.try_get(index).map_err(read_error)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index).map_err(read_error)?),
        _ => {
            // Fallback: geometry and other extension types are expected to be cast to text by the projection
            DatabaseValue::String(row.try_get(index).map_err(read_error)?)
        }
    };

    Ok(value)
}
