//! Query shapes and the statement cache
//!
//! A [`Projection`] describes what an exporter selects: a base table, the
//! columns it needs and the joins that bring in owned tables. A [`Predicate`]
//! picks the row subset. Each distinct predicate over a projection is
//! rendered once by the [`StatementCache`] and reused for the rest of the job.

use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{ExportError, ExportResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Alias the side table is joined under
pub const SIDE_TABLE_ALIAS: &str = "side";

/// How a joined table is attached to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A joined table and the table it hangs off
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    /// Alias of the table this join is owned by
    pub owner: String,
    /// `(owner column, joined column)`, both alias-qualified
    pub on: (String, String),
    pub kind: JoinKind,
}

impl Join {
    pub fn left(table: &str, alias: &str, owner: &str, owner_column: &str, joined_column: &str) -> Self {
        Self {
            table: table.to_string(),
            alias: alias.to_string(),
            owner: owner.to_string(),
            on: (owner_column.to_string(), joined_column.to_string()),
            kind: JoinKind::Left,
        }
    }

    pub fn inner(table: &str, alias: &str, owner: &str, owner_column: &str, joined_column: &str) -> Self {
        Self {
            kind: JoinKind::Inner,
            ..Self::left(table, alias, owner, owner_column, joined_column)
        }
    }
}

/// Base projection of an exporter's query
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub name: String,
    pub table: String,
    pub alias: String,
    pub columns: Vec<String>,
    pub joins: Vec<Join>,
    pub id_column: String,
    /// Column linking rows to the object that owns them
    pub parent_column: Option<String>,
    pub type_column: Option<String>,
    /// Column matched against the side table by [`Predicate::InSideTable`]
    pub side_join_column: Option<String>,
    pub order_by: Option<String>,
}

impl Projection {
    pub fn new(name: &str, table: &str, alias: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            alias: alias.to_string(),
            columns: Vec::new(),
            joins: Vec::new(),
            id_column: format!("{}.id", alias),
            parent_column: None,
            type_column: None,
            side_join_column: None,
            order_by: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn id_column(mut self, column: &str) -> Self {
        self.id_column = column.to_string();
        self
    }

    pub fn parent_column(mut self, column: &str) -> Self {
        self.parent_column = Some(column.to_string());
        self
    }

    pub fn type_column(mut self, column: &str) -> Self {
        self.type_column = Some(column.to_string());
        self
    }

    pub fn side_join_column(mut self, column: &str) -> Self {
        self.side_join_column = Some(column.to_string());
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    /// Check join metadata. Every join must hang off the base table or a
    /// table joined before it, and its `ON` columns must belong to the owner
    /// and the joined table respectively.
    pub fn validate(&self) -> ExportResult<()> {
        if self.columns.is_empty() {
            return Err(ExportError::Configuration(format!(
                "Projection '{}' selects no columns",
                self.name
            )));
        }

        let mut known = vec![self.alias.as_str()];
        for join in &self.joins {
            if join.alias == SIDE_TABLE_ALIAS {
                return Err(ExportError::Configuration(format!(
                    "Projection '{}': alias '{}' is reserved for the side table",
                    self.name, SIDE_TABLE_ALIAS
                )));
            }
            if known.contains(&join.alias.as_str()) {
                return Err(ExportError::Configuration(format!(
                    "Projection '{}': duplicate alias '{}'",
                    self.name, join.alias
                )));
            }
            if !known.contains(&join.owner.as_str()) {
                return Err(ExportError::Configuration(format!(
                    "Projection '{}': join on '{}' declares owner '{}', which is not the base table or an earlier join",
                    self.name, join.table, join.owner
                )));
            }
            if qualifier(&join.on.0) != Some(join.owner.as_str()) {
                return Err(ExportError::Configuration(format!(
                    "Projection '{}': join on '{}' uses '{}', which does not belong to its owner '{}'",
                    self.name, join.table, join.on.0, join.owner
                )));
            }
            if qualifier(&join.on.1) != Some(join.alias.as_str()) {
                return Err(ExportError::Configuration(format!(
                    "Projection '{}': join on '{}' uses '{}', which does not belong to the joined table '{}'",
                    self.name, join.table, join.on.1, join.alias
                )));
            }
            known.push(join.alias.as_str());
        }

        Ok(())
    }

    fn render_base(&self) -> String {
        let mut sql = format!("SELECT {} FROM {} {}", self.columns.join(", "), self.table, self.alias);
        for join in &self.joins {
            sql.push_str(&format!(
                " {} {} {} ON {} = {}",
                join.kind.keyword(),
                join.table,
                join.alias,
                join.on.0,
                join.on.1
            ));
        }
        sql
    }

    fn required(&self, column: &Option<String>, what: &str, predicate: &Predicate) -> ExportResult<String> {
        column.clone().ok_or_else(|| {
            ExportError::Configuration(format!(
                "Projection '{}' has no {} column, required by predicate {}",
                self.name, what, predicate
            ))
        })
    }

    /// Render the full statement for a predicate
    pub fn render(&self, predicate: &Predicate, dialect: SqlDialect) -> ExportResult<String> {
        let mut sql = self.render_base();
        let placeholders = |count: usize| -> String {
            (0..count)
                .map(|index| dialect.parameter_placeholder(index))
                .collect::<Vec<_>>()
                .join(", ")
        };

        match predicate {
            Predicate::ById => {
                sql.push_str(&format!(" WHERE {} = {}", self.id_column, dialect.parameter_placeholder(0)));
            }
            Predicate::ByParentId => {
                let parent = self.required(&self.parent_column, "parent", predicate)?;
                sql.push_str(&format!(" WHERE {} = {}", parent, dialect.parameter_placeholder(0)));
            }
            Predicate::ByParentIdAndType => {
                let parent = self.required(&self.parent_column, "parent", predicate)?;
                let type_column = self.required(&self.type_column, "type", predicate)?;
                sql.push_str(&format!(
                    " WHERE {} = {} AND {} = {}",
                    parent,
                    dialect.parameter_placeholder(0),
                    type_column,
                    dialect.parameter_placeholder(1)
                ));
            }
            Predicate::BulkById(size) => {
                if *size == 0 {
                    return Err(ExportError::Configuration("Bulk predicates need a positive size".to_string()));
                }
                sql.push_str(&format!(" WHERE {} IN ({})", self.id_column, placeholders(*size)));
            }
            Predicate::BulkByParentId(size) => {
                if *size == 0 {
                    return Err(ExportError::Configuration("Bulk predicates need a positive size".to_string()));
                }
                let parent = self.required(&self.parent_column, "parent", predicate)?;
                sql.push_str(&format!(" WHERE {} IN ({})", parent, placeholders(*size)));
            }
            Predicate::InSideTable(table) => {
                let column = self.required(&self.side_join_column, "side join", predicate)?;
                sql.push_str(&format!(
                    " INNER JOIN {} {} ON {}.id = {}",
                    table, SIDE_TABLE_ALIAS, SIDE_TABLE_ALIAS, column
                ));
            }
        }

        if let Some(order_by) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {}", order_by));
        }

        Ok(sql)
    }
}

/// Name a qualified column carries in result rows
pub fn row_column(column: &str) -> &str {
    let column = match column.rfind(" AS ").or_else(|| column.rfind(" as ")) {
        Some(position) => &column[position + 4..],
        None => column,
    };
    column.rsplit('.').next().unwrap_or(column).trim()
}

fn qualifier(column: &str) -> Option<&str> {
    column.split_once('.').map(|(alias, _)| alias)
}

/// Row subset selected from a projection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    ById,
    ByParentId,
    ByParentIdAndType,
    BulkById(usize),
    BulkByParentId(usize),
    /// Rows whose side join column is listed in the named side table
    InSideTable(String),
}

impl Predicate {
    /// Number of bind parameters the rendered statement takes
    pub fn parameter_count(&self) -> usize {
        match self {
            Predicate::ById | Predicate::ByParentId => 1,
            Predicate::ByParentIdAndType => 2,
            Predicate::BulkById(size) | Predicate::BulkByParentId(size) => *size,
            Predicate::InSideTable(_) => 0,
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Predicate::BulkById(_) | Predicate::BulkByParentId(_))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::ById => write!(f, "by_id"),
            Predicate::ByParentId => write!(f, "by_parent_id"),
            Predicate::ByParentIdAndType => write!(f, "by_parent_id_and_type"),
            Predicate::BulkById(size) => write!(f, "bulk_by_id[{}]", size),
            Predicate::BulkByParentId(size) => write!(f, "bulk_by_parent_id[{}]", size),
            Predicate::InSideTable(table) => write!(f, "in_side_table[{}]", table),
        }
    }
}

/// A rendered statement with its parameter arity
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    sql: String,
    predicate: Predicate,
}

impl PreparedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Parameters for an identifier list. Bulk statements are padded to their
    /// fixed size with `sentinel`.
    pub fn id_params(&self, ids: &[i64], sentinel: i64) -> ExportResult<Vec<DatabaseValue>> {
        let arity = self.predicate.parameter_count();
        if ids.len() > arity || (!self.predicate.is_bulk() && ids.len() != arity) {
            return Err(ExportError::Query(format!(
                "Statement {} takes {} identifiers, got {}",
                self.predicate,
                arity,
                ids.len()
            )));
        }

        let mut params: Vec<DatabaseValue> = ids.iter().map(|id| DatabaseValue::Int64(*id)).collect();
        params.resize(arity, DatabaseValue::Int64(sentinel));
        Ok(params)
    }

    /// Check an explicit parameter list against the statement's arity
    pub fn params(&self, values: Vec<DatabaseValue>) -> ExportResult<Vec<DatabaseValue>> {
        let arity = self.predicate.parameter_count();
        if values.len() != arity {
            return Err(ExportError::Query(format!(
                "Statement {} takes {} parameters, got {}",
                self.predicate,
                arity,
                values.len()
            )));
        }
        Ok(values)
    }
}

/// Statement cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementStats {
    pub builds: usize,
    pub hits: usize,
    pub cached: usize,
}

/// Lazily rendered statements for one projection
#[derive(Debug)]
pub struct StatementCache {
    projection: Projection,
    dialect: SqlDialect,
    statements: HashMap<Predicate, Arc<PreparedQuery>>,
    builds: usize,
    hits: usize,
}

impl StatementCache {
    /// Create a cache, validating the projection's join metadata first
    pub fn new(projection: Projection, dialect: SqlDialect) -> ExportResult<Self> {
        projection.validate()?;
        Ok(Self {
            projection,
            dialect,
            statements: HashMap::new(),
            builds: 0,
            hits: 0,
        })
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Get the statement for a predicate, rendering it on first use
    pub fn get_or_create(&mut self, predicate: &Predicate) -> ExportResult<Arc<PreparedQuery>> {
        if let Some(statement) = self.statements.get(predicate) {
            self.hits += 1;
            return Ok(Arc::clone(statement));
        }

        let sql = self.projection.render(predicate, self.dialect)?;
        tracing::debug!(
            "Prepared statement for '{}' ({}): {}",
            self.projection.name,
            predicate,
            sql
        );

        let statement = Arc::new(PreparedQuery {
            sql,
            predicate: predicate.clone(),
        });
        self.statements.insert(predicate.clone(), Arc::clone(&statement));
        self.builds += 1;
        Ok(statement)
    }

    pub fn stats(&self) -> StatementStats {
        StatementStats {
            builds: self.builds,
            hits: self.hits,
            cached: self.statements.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry_projection() -> Projection {
        Projection::new("geometry", "surface_geometry", "g")
            .columns(["g.id", "g.parent_id", "g.root_id", "g.type_id", "ig.mime_type"])
            .join(Join::left("implicit_geometry", "ig", "g", "g.implicit_id", "ig.id"))
            .parent_column("g.root_id")
            .order_by("g.id")
    }

    #[test]
    fn test_render_single_and_bulk() {
        let projection = geometry_projection();
        let single = projection.render(&Predicate::ById, SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            single,
            "SELECT g.id, g.parent_id, g.root_id, g.type_id, ig.mime_type FROM surface_geometry g \
             LEFT JOIN implicit_geometry ig ON g.implicit_id = ig.id WHERE g.id = $1 ORDER BY g.id"
        );

        let bulk = projection
            .render(&Predicate::BulkByParentId(3), SqlDialect::PostgreSQL)
            .unwrap();
        assert!(bulk.contains("WHERE g.root_id IN ($1, $2, $3)"));

        let sqlite = projection.render(&Predicate::BulkById(2), SqlDialect::SQLite).unwrap();
        assert!(sqlite.contains("WHERE g.id IN (?, ?)"));
    }

    #[test]
    fn test_join_owner_must_be_known() {
        let projection = Projection::new("appearance", "appearance", "a")
            .columns(["a.id"])
            .join(Join::left("textureparam", "tp", "sd", "sd.id", "tp.surface_data_id"))
            .join(Join::left("surface_data", "sd", "a", "a.id", "sd.appearance_id"));

        let err = StatementCache::new(projection, SqlDialect::PostgreSQL).unwrap_err();
        assert!(matches!(err, ExportError::Configuration(ref msg) if msg.contains("owner 'sd'")));
    }

    #[test]
    fn test_join_columns_must_match_tables() {
        let projection = Projection::new("appearance", "appearance", "a")
            .columns(["a.id"])
            .join(Join::left("surface_data", "sd", "a", "x.id", "sd.appearance_id"));
        assert!(matches!(projection.validate(), Err(ExportError::Configuration(_))));

        let projection = Projection::new("appearance", "appearance", "a")
            .columns(["a.id"])
            .join(Join::left("surface_data", "sd", "a", "a.id", "a.appearance_id"));
        assert!(matches!(projection.validate(), Err(ExportError::Configuration(_))));
    }

    #[test]
    fn test_missing_parent_column_is_configuration_error() {
        let projection = Projection::new("feature", "cityobject", "co").columns(["co.id"]);
        let mut cache = StatementCache::new(projection, SqlDialect::PostgreSQL).unwrap();
        assert!(matches!(
            cache.get_or_create(&Predicate::ByParentId),
            Err(ExportError::Configuration(_))
        ));
    }

    #[test]
    fn test_statements_are_built_once_per_shape() {
        let mut cache = StatementCache::new(geometry_projection(), SqlDialect::PostgreSQL).unwrap();
        let first = cache.get_or_create(&Predicate::BulkByParentId(10)).unwrap();
        let second = cache.get_or_create(&Predicate::BulkByParentId(10)).unwrap();
        cache.get_or_create(&Predicate::ByParentId).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            StatementStats {
                builds: 2,
                hits: 1,
                cached: 2
            }
        );
    }

    #[test]
    fn test_id_params_are_padded_with_sentinel() {
        let mut cache = StatementCache::new(geometry_projection(), SqlDialect::PostgreSQL).unwrap();
        let bulk = cache.get_or_create(&Predicate::BulkById(4)).unwrap();
        assert_eq!(
            bulk.id_params(&[7, 9], 0).unwrap(),
            vec![
                DatabaseValue::Int64(7),
                DatabaseValue::Int64(9),
                DatabaseValue::Int64(0),
                DatabaseValue::Int64(0)
            ]
        );
        assert!(bulk.id_params(&[1, 2, 3, 4, 5], 0).is_err());

        let single = cache.get_or_create(&Predicate::ById).unwrap();
        assert!(single.id_params(&[1, 2], 0).is_err());
        assert_eq!(single.id_params(&[1], 0).unwrap(), vec![DatabaseValue::Int64(1)]);
    }

    #[test]
    fn test_parent_and_type_filter() {
        let projection = geometry_projection().type_column("g.type_id");
        let mut cache = StatementCache::new(projection, SqlDialect::PostgreSQL).unwrap();
        let statement = cache.get_or_create(&Predicate::ByParentIdAndType).unwrap();
        assert!(statement.sql().ends_with("WHERE g.root_id = $1 AND g.type_id = $2 ORDER BY g.id"));

        let params = statement
            .params(vec![DatabaseValue::Int64(4), DatabaseValue::Int32(5)])
            .unwrap();
        assert_eq!(params.len(), 2);
        assert!(statement.params(vec![DatabaseValue::Int64(4)]).is_err());
    }

    #[test]
    fn test_side_table_join() {
        let projection = Projection::new("appearance", "appearance", "a")
            .columns(["a.id", "tp.surface_geometry_id"])
            .join(Join::inner("textureparam", "tp", "a", "a.id", "tp.appearance_id"))
            .side_join_column("tp.surface_geometry_id");
        let sql = projection
            .render(&Predicate::InSideTable("strata_global_targets".into()), SqlDialect::PostgreSQL)
            .unwrap();
        assert!(sql.ends_with("INNER JOIN strata_global_targets side ON side.id = tp.surface_geometry_id"));
    }

    #[test]
    fn test_row_column_names() {
        assert_eq!(row_column("g.root_id"), "root_id");
        assert_eq!(row_column("ig.id AS implicit_id"), "implicit_id");
        assert_eq!(row_column("gmlid"), "gmlid");
    }
}
