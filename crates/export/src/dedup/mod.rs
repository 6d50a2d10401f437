//! Deduplication caches for shared sub-objects
//!
//! A [`DedupCache`] maps a [`CacheKey`] to a value materialized once. The
//! global flavor lives for a whole job and collects referenced target ids in
//! a [`SideTable`] so one bulk statement can join against them. The local
//! flavor is scoped to a single parent object and never touches the side
//! table.

use crate::backends::{DataSource, DatabaseValue, SqlDialect};
use crate::error::ExportResult;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Lifetime of a dedup cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Whole job
    Global,
    /// One parent object
    Local,
}

/// Canonical restriction on candidate values (e.g. selected themes)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterContext(BTreeSet<String>);

impl FilterContext {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.contains(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cache key: the object id plus the filter it was resolved under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub id: i64,
    pub filter: Option<FilterContext>,
}

impl CacheKey {
    pub fn new(id: i64) -> Self {
        Self { id, filter: None }
    }

    pub fn filtered(id: i64, filter: Option<&FilterContext>) -> Self {
        Self {
            id,
            filter: filter.filter(|filter| !filter.is_empty()).cloned(),
        }
    }
}

/// Dedup cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub hits: usize,
    pub misses: usize,
    pub cached: usize,
}

/// Values materialized at most once per scope
#[derive(Debug)]
pub struct DedupCache<V> {
    scope: Scope,
    values: HashMap<CacheKey, Arc<V>>,
    side_table: Option<SideTable>,
    hits: usize,
    misses: usize,
}

impl<V> DedupCache<V> {
    pub fn local() -> Self {
        Self {
            scope: Scope::Local,
            values: HashMap::new(),
            side_table: None,
            hits: 0,
            misses: 0,
        }
    }

    pub fn global(side_table: SideTable) -> Self {
        Self {
            scope: Scope::Global,
            side_table: Some(side_table),
            ..Self::local()
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<V>> {
        match self.values.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(Arc::clone(value))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.values.contains_key(key)
    }

    /// Store a value; the first value stored for a key wins
    pub fn store(&mut self, key: CacheKey, value: V) -> Arc<V> {
        Arc::clone(self.values.entry(key).or_insert_with(|| Arc::new(value)))
    }

    /// Return the cached value for `key`, materializing it on first use.
    ///
    /// `materialize` runs only on a miss; `Ok(None)` from it leaves nothing
    /// cached.
    pub async fn resolve<F, Fut>(&mut self, key: CacheKey, materialize: F) -> ExportResult<Option<Arc<V>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExportResult<Option<V>>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Some(value));
        }

        Ok(materialize().await?.map(|value| self.store(key, value)))
    }

    /// Side table of the global flavor
    pub fn side_table(&mut self) -> Option<&mut SideTable> {
        self.side_table.as_mut()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            hits: self.hits,
            misses: self.misses,
            cached: self.values.len(),
        }
    }

    /// Drop every cached value and side table registration
    pub fn clear(&mut self) -> usize {
        let cleared = self.values.len();
        self.values.clear();
        if let Some(side_table) = &mut self.side_table {
            side_table.reset();
        }
        cleared
    }
}

/// Temporary table of referenced identifiers, filled in buffered chunks
#[derive(Debug)]
pub struct SideTable {
    name: String,
    dialect: SqlDialect,
    batch_size: usize,
    created: bool,
    registered: HashSet<i64>,
    buffer: Vec<i64>,
}

impl SideTable {
    pub fn new(name: &str, dialect: SqlDialect, batch_size: usize) -> Self {
        Self {
            name: name.to_string(),
            dialect,
            batch_size: batch_size.max(1),
            created: false,
            registered: HashSet::new(),
            buffer: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a referenced id; returns whether it was new
    pub fn register(&mut self, id: i64) -> bool {
        if self.registered.insert(id) {
            self.buffer.push(id);
            true
        } else {
            false
        }
    }

    /// Ids registered but not yet inserted
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Ids registered overall
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Create the table if needed and insert buffered ids in `batch_size` chunks
    pub async fn flush(&mut self, source: &dyn DataSource) -> ExportResult<usize> {
        if !self.created {
            let sql = format!(
                "CREATE TEMPORARY TABLE IF NOT EXISTS {} (id {} PRIMARY KEY)",
                self.name,
                self.dialect.identifier_type()
            );
            source.execute(&sql, &[]).await?;
            self.created = true;
        }

        let buffer = std::mem::take(&mut self.buffer);
        for chunk in buffer.chunks(self.batch_size) {
            let values = (0..chunk.len())
                .map(|index| format!("({})", self.dialect.parameter_placeholder(index)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("INSERT INTO {} (id) VALUES {}", self.name, values);
            let params: Vec<DatabaseValue> = chunk.iter().map(|id| DatabaseValue::Int64(*id)).collect();
            source.execute(&sql, &params).await?;
        }

        if !buffer.is_empty() {
            tracing::debug!("Side table {} received {} ids", self.name, buffer.len());
        }
        Ok(buffer.len())
    }

    /// Drop the table at the end of a job
    pub async fn drop_table(&mut self, source: &dyn DataSource) -> ExportResult<()> {
        if self.created {
            source
                .execute(&format!("DROP TABLE IF EXISTS {}", self.name), &[])
                .await?;
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.created = false;
        self.registered.clear();
        self.buffer.clear();
    }
}
