//! In-memory data source
//!
//! Serves rows registered per table and interprets the statement shapes the
//! engine renders (`WHERE col = $n`, `WHERE col IN (...)`, side table joins
//! and the side table DDL/DML). Rows are registered already joined, so
//! ordinary `LEFT JOIN`/`INNER JOIN` clauses are not evaluated and rows come
//! back in registration order. Every statement is recorded, which lets tests
//! count round trips.

use super::core::*;
use crate::error::{ExportError, ExportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// A row with ordered, named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl MemoryRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a column value
    pub fn with(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| name == column) {
            Some(entry) => entry.1 = value,
            None => self.columns.push((column.to_string(), value)),
        }
        self
    }

    fn value(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

impl DatabaseRow for MemoryRow {
    fn get_by_name(&self, name: &str) -> ExportResult<DatabaseValue> {
        self.value(name)
            .cloned()
            .ok_or_else(|| ExportError::column(name, "column not found"))
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Whether a statement read rows or changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Fetch,
    Execute,
}

/// A statement received by the memory source
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Debug, Default)]
struct SessionState {
    temp_tables: HashMap<String, BTreeSet<i64>>,
    statements: Vec<RecordedStatement>,
    fail_next: Option<String>,
}

/// In-memory data source for tests and dry runs
#[derive(Debug)]
pub struct MemorySource {
    dialect: SqlDialect,
    tables: HashMap<String, Vec<MemoryRow>>,
    state: Mutex<SessionState>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::with_dialect(SqlDialect::PostgreSQL)
    }

    pub fn with_dialect(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            tables: HashMap::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Register rows for a table, appending to rows already registered
    pub fn with_table(mut self, table: &str, rows: Vec<MemoryRow>) -> Self {
        self.tables.entry(table.to_string()).or_default().extend(rows);
        self
    }

    /// Make the next statement fail with a database error
    pub fn fail_next(&self, message: &str) {
        self.state.lock().fail_next = Some(message.to_string());
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state.lock().statements.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.count(StatementKind::Fetch)
    }

    pub fn execute_count(&self) -> usize {
        self.count(StatementKind::Execute)
    }

    fn count(&self, kind: StatementKind) -> usize {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|statement| statement.kind == kind)
            .count()
    }

    /// Forget recorded statements
    pub fn reset_statements(&self) {
        self.state.lock().statements.clear();
    }

    /// Identifiers currently held by a temporary table
    pub fn temp_table_ids(&self, table: &str) -> Option<Vec<i64>> {
        self.state
            .lock()
            .temp_tables
            .get(table)
            .map(|ids| ids.iter().copied().collect())
    }

    fn record(&self, kind: StatementKind, sql: &str, params: &[DatabaseValue]) -> ExportResult<()> {
        let mut state = self.state.lock();
        state.statements.push(RecordedStatement {
            kind,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match state.fail_next.take() {
            Some(message) => Err(ExportError::Database(message)),
            None => Ok(()),
        }
    }

    fn select(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<Vec<MemoryRow>> {
        let sql = normalize(sql);
        let table = word_after(&sql, " FROM ")
            .ok_or_else(|| ExportError::Query(format!("No FROM clause in: {}", sql)))?;
        let rows = self
            .tables
            .get(table)
            .ok_or_else(|| ExportError::Database(format!("relation \"{}\" does not exist", table)))?;

        let mut filters = Vec::new();
        let state = self.state.lock();
        for join in sql.split(" JOIN ").skip(1) {
            let tokens: Vec<&str> = join.split(' ').collect();
            // <table> <alias> ON <left> = <right>
            if tokens.len() < 6 {
                continue;
            }
            if let Some(ids) = state.temp_tables.get(tokens[0]) {
                let values = ids.iter().map(|id| DatabaseValue::Int64(*id)).collect();
                filters.push(Filter::In(unqualified(tokens[5]).to_string(), values));
            }
        }
        drop(state);

        let mut placeholder = Placeholders::new(params);
        if let Some(position) = sql.find(" WHERE ") {
            let clause = &sql[position + 7..];
            let clause = clause.split(" ORDER BY ").next().unwrap_or(clause);
            for condition in clause.split(" AND ") {
                filters.push(Filter::parse(condition, &mut placeholder)?);
            }
        }

        Ok(rows
            .iter()
            .filter(|row| filters.iter().all(|filter| filter.matches(row)))
            .cloned()
            .collect())
    }

    fn apply(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<u64> {
        let sql = normalize(sql);
        let mut state = self.state.lock();

        if sql.starts_with("CREATE TEMPORARY TABLE") {
            let table = sql
                .trim_start_matches("CREATE TEMPORARY TABLE ")
                .trim_start_matches("IF NOT EXISTS ")
                .split(|c: char| c == ' ' || c == '(')
                .next()
                .unwrap_or_default()
                .to_string();
            state.temp_tables.entry(table).or_default();
            return Ok(0);
        }

        if let Some(table) = word_after(&sql, "INSERT INTO ") {
            let ids = state
                .temp_tables
                .get_mut(table)
                .ok_or_else(|| ExportError::Database(format!("relation \"{}\" does not exist", table)))?;
            let mut inserted = 0;
            for param in params {
                let id = param
                    .as_i64()
                    .ok_or_else(|| ExportError::Query(format!("Non-integer id inserted into {}", table)))?;
                if ids.insert(id) {
                    inserted += 1;
                }
            }
            return Ok(inserted);
        }

        if let Some(table) = word_after(&sql, "DELETE FROM ") {
            return Ok(state
                .temp_tables
                .get_mut(table)
                .map(|ids| {
                    let removed = ids.len() as u64;
                    ids.clear();
                    removed
                })
                .unwrap_or(0));
        }

        if let Some(table) = word_after(&sql, "DROP TABLE IF EXISTS ") {
            state.temp_tables.remove(table);
            return Ok(0);
        }

        Err(ExportError::Query(format!("Unsupported statement: {}", sql)))
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<Vec<Box<dyn DatabaseRow>>> {
        self.record(StatementKind::Fetch, sql, params)?;
        let rows = self.select(sql, params)?;
        tracing::trace!("Memory fetch returned {} rows", rows.len());
        Ok(rows
            .into_iter()
            .map(|row| Box::new(row) as Box<dyn DatabaseRow>)
            .collect())
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> ExportResult<u64> {
        self.record(StatementKind::Execute, sql, params)?;
        self.apply(sql, params)
    }

    fn dialect(&self) -> SqlDialect {
        self.dialect
    }
}

enum Filter {
    Eq(String, DatabaseValue),
    In(String, Vec<DatabaseValue>),
}

impl Filter {
    fn parse(condition: &str, placeholders: &mut Placeholders<'_>) -> ExportResult<Self> {
        let condition = condition.trim();
        if let Some((column, list)) = condition.split_once(" IN ") {
            let list = list.trim().trim_start_matches('(').trim_end_matches(')');
            let values = list
                .split(',')
                .map(|token| placeholders.resolve(token.trim()))
                .collect::<ExportResult<Vec<_>>>()?;
            return Ok(Filter::In(unqualified(column.trim()).to_string(), values));
        }
        if let Some((column, token)) = condition.split_once(" = ") {
            let value = placeholders.resolve(token.trim())?;
            return Ok(Filter::Eq(unqualified(column.trim()).to_string(), value));
        }
        Err(ExportError::Query(format!("Unsupported condition: {}", condition)))
    }

    fn matches(&self, row: &MemoryRow) -> bool {
        match self {
            Filter::Eq(column, expected) => row.value(column).is_some_and(|value| same_value(value, expected)),
            Filter::In(column, candidates) => row
                .value(column)
                .is_some_and(|value| candidates.iter().any(|candidate| same_value(value, candidate))),
        }
    }
}

struct Placeholders<'a> {
    params: &'a [DatabaseValue],
    next: usize,
}

impl<'a> Placeholders<'a> {
    fn new(params: &'a [DatabaseValue]) -> Self {
        Self { params, next: 0 }
    }

    fn resolve(&mut self, token: &str) -> ExportResult<DatabaseValue> {
        let index = match token.strip_prefix('$') {
            Some(number) => number
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .ok_or_else(|| ExportError::Query(format!("Bad placeholder: {}", token)))?,
            None if token == "?" => {
                self.next += 1;
                self.next - 1
            }
            None => return Err(ExportError::Query(format!("Expected a placeholder, got: {}", token))),
        };
        self.params
            .get(index)
            .cloned()
            .ok_or_else(|| ExportError::Query(format!("Missing parameter for {}", token)))
    }
}

fn same_value(left: &DatabaseValue, right: &DatabaseValue) -> bool {
    match (left.as_i64(), right.as_i64()) {
        (Some(l), Some(r)) => l == r,
        _ => !left.is_null() && left == right,
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn word_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let position = sql.find(keyword)?;
    sql[position + keyword.len()..]
        .split(|c: char| c == ' ' || c == '(')
        .next()
        .filter(|word| !word.is_empty())
}

fn unqualified(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseRowExt;

    fn source() -> MemorySource {
        MemorySource::new().with_table(
            "surface_geometry",
            vec![
                MemoryRow::new().with("id", 1i64).with("root_id", 1i64),
                MemoryRow::new().with("id", 2i64).with("root_id", 1i64),
                MemoryRow::new().with("id", 3i64).with("root_id", 3i64),
            ],
        )
    }

    #[tokio::test]
    async fn test_in_and_eq_conditions() {
        let source = source();
        let rows = source
            .fetch_all(
                "SELECT g.id FROM surface_geometry g WHERE g.root_id IN ($1, $2)",
                &[DatabaseValue::Int64(1), DatabaseValue::Int64(0)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = source
            .fetch_all(
                "SELECT g.id FROM surface_geometry g WHERE g.id = $1 ORDER BY g.id",
                &[DatabaseValue::Int32(3)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].try_get::<i64>("root_id").unwrap(), Some(3));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_sequential_placeholders() {
        let source = MemorySource::with_dialect(SqlDialect::SQLite).with_table(
            "attribute",
            vec![
                MemoryRow::new().with("id", 1i64).with("owner_id", 5i64).with("kind", "string"),
                MemoryRow::new().with("id", 2i64).with("owner_id", 5i64).with("kind", "set"),
            ],
        );
        let rows = source
            .fetch_all(
                "SELECT a.id FROM attribute a WHERE a.owner_id = ? AND a.kind = ?",
                &[DatabaseValue::Int64(5), DatabaseValue::from("set")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].try_get::<i64>("id").unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_side_table_join() {
        let source = source();
        source
            .execute("CREATE TEMPORARY TABLE IF NOT EXISTS targets (id BIGINT PRIMARY KEY)", &[])
            .await
            .unwrap();
        let inserted = source
            .execute(
                "INSERT INTO targets (id) VALUES ($1), ($2)",
                &[DatabaseValue::Int64(3), DatabaseValue::Int64(3)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = source
            .fetch_all(
                "SELECT g.id FROM surface_geometry g INNER JOIN targets side ON side.id = g.root_id",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.temp_table_ids("targets"), Some(vec![3]));
    }

    #[tokio::test]
    async fn test_fail_next_fails_once() {
        let source = source();
        source.fail_next("connection reset");

        let err = source
            .fetch_all("SELECT g.id FROM surface_geometry g WHERE g.id = $1", &[DatabaseValue::Int64(1)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExportError::Database(ref msg) if msg == "connection reset"));

        let rows = source
            .fetch_all("SELECT g.id FROM surface_geometry g WHERE g.id = $1", &[DatabaseValue::Int64(1)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.statements().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let source = source();
        let result = source.fetch_all("SELECT x.id FROM missing x WHERE x.id = $1", &[DatabaseValue::Int64(1)]).await;
        assert!(matches!(result, Err(ExportError::Database(_))));
    }

    #[test]
    fn test_row_absence() {
        let row = MemoryRow::new().with("gmlid", DatabaseValue::Null).with("id", 4i64);
        assert_eq!(row.try_get::<String>("gmlid").unwrap(), None);
        assert_eq!(row.try_get::<String>("missing").unwrap(), None);
        assert!(row.is_null("gmlid"));
        assert!(!row.is_null("id"));
        assert!(row.get::<String>("gmlid").is_err());
    }
}
