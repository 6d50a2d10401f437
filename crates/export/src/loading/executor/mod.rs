use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::config::ExportConfig;
use crate::context::ExportContext;
use crate::error::{ExportError, ExportResult};
use crate::loading::batch_queue::{BatchQueue, RowId};
use crate::reporting::ExportIssue;
use crate::statement::{row_column, Predicate, Projection, StatementCache, StatementStats};
use std::collections::HashMap;
use std::sync::Arc;

/// Column a batched exporter groups its rows by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKey {
    /// The projection's id column: one row group per object
    Id,
    /// The projection's parent column: every row owned by the requested id
    Parent,
}

/// Turns the row group of one requested id into a value
pub trait RowMaterializer: Send {
    type Output: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn projection(&self) -> Projection;

    fn batch_key(&self) -> BatchKey {
        BatchKey::Id
    }

    /// Build the value for `id` from its rows, in arrival order.
    ///
    /// `Ok(None)` skips the id; the materializer has reported why through
    /// the context. Non-fatal errors are reported by the executor.
    fn materialize(
        &mut self,
        id: RowId,
        rows: &[Box<dyn DatabaseRow>],
        ctx: &mut ExportContext,
    ) -> ExportResult<Option<Self::Output>>;
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub exporter: &'static str,
    /// Distinct ids requested
    pub requested: usize,
    /// Ids whose value was materialized
    pub resolved: usize,
    /// Ids without matching rows
    pub dangling: Vec<RowId>,
    pub setters_fired: usize,
    pub queries: usize,
    pub rows: usize,
    /// Ids skipped by the materializer
    pub skipped: usize,
    /// Ids whose materialization failed and was reported
    pub failed: usize,
}

impl BatchReport {
    fn new(exporter: &'static str, requested: usize) -> Self {
        Self {
            exporter,
            requested,
            ..Self::default()
        }
    }
}

/// A sub-exporter that defers requests and resolves them in bulk
pub struct BatchedExporter<M: RowMaterializer> {
    materializer: M,
    statements: StatementCache,
    key_column: String,
    queue: BatchQueue<M::Output>,
    batch_size: usize,
    sentinel_id: i64,
}

impl<M: RowMaterializer> BatchedExporter<M> {
    /// Create the exporter, validating the materializer's projection
    pub fn new(materializer: M, config: &ExportConfig) -> ExportResult<Self> {
        let projection = materializer.projection();
        let key_column = match materializer.batch_key() {
            BatchKey::Id => row_column(&projection.id_column).to_string(),
            BatchKey::Parent => match &projection.parent_column {
                Some(column) => row_column(column).to_string(),
                None => {
                    return Err(ExportError::Configuration(format!(
                        "Exporter '{}' batches by parent but its projection has no parent column",
                        materializer.name()
                    )))
                }
            },
        };
        let statements = StatementCache::new(projection, *config.get_dialect())?;

        Ok(Self {
            materializer,
            statements,
            key_column,
            queue: BatchQueue::new(),
            batch_size: *config.get_batch_size(),
            sentinel_id: *config.get_sentinel_id(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.materializer.name()
    }

    /// Defer `setter` until `id` is resolved by the next flush
    pub fn add_batch<F>(&mut self, id: RowId, setter: F)
    where
        F: FnOnce(Arc<M::Output>) + Send + 'static,
    {
        self.queue.add(id, setter);
    }

    /// Drop pending requests without invoking any setter
    pub fn clear_batch(&mut self) -> usize {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!("Cleared {} pending requests of {}", dropped, self.name());
        }
        dropped
    }

    /// Distinct ids waiting for the next flush
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn materializer(&self) -> &M {
        &self.materializer
    }

    pub fn materializer_mut(&mut self) -> &mut M {
        &mut self.materializer
    }

    pub fn statement_stats(&self) -> StatementStats {
        self.statements.stats()
    }

    /// Resolve every pending id and fan the values out to their setters.
    ///
    /// The queue is empty when this returns, on success and on error alike.
    pub async fn execute_batch(
        &mut self,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<BatchReport> {
        let mut batch = self.queue.take();
        let name = self.name();
        let mut report = BatchReport::new(name, batch.ids().len());
        if batch.is_empty() {
            return Ok(report);
        }

        let mut grouped = match self.fetch(batch.ids(), source, &mut report).await {
            Ok(grouped) => grouped,
            Err(err) => {
                tracing::error!("Batch fetch for {} failed, dropping {} requests: {}", name, report.requested, err);
                return Err(err);
            }
        };

        let ids = batch.ids().to_vec();
        for id in ids {
            let Some(rows) = grouped.remove(&id) else {
                batch.discard(id);
                report.dangling.push(id);
                ctx.reporter.report(ExportIssue::dangling(name, id))?;
                continue;
            };

            match self.materializer.materialize(id, &rows, ctx) {
                Ok(Some(value)) => {
                    report.resolved += 1;
                    report.setters_fired += batch.fire(id, Arc::new(value));
                }
                Ok(None) => {
                    report.skipped += 1;
                    batch.discard(id);
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!("Materializing {} #{} failed: {}", name, id, err);
                    return Err(err);
                }
                Err(err) => {
                    report.failed += 1;
                    batch.discard(id);
                    ctx.reporter.report(ExportIssue::row_failure(name, id, &err))?;
                }
            }
        }

        tracing::debug!(
            "Flushed {}: {} requested, {} resolved, {} dangling, {} setters, {} queries",
            name,
            report.requested,
            report.resolved,
            report.dangling.len(),
            report.setters_fired,
            report.queries
        );
        Ok(report)
    }

    async fn fetch(
        &mut self,
        ids: &[RowId],
        source: &dyn DataSource,
        report: &mut BatchReport,
    ) -> ExportResult<HashMap<RowId, Vec<Box<dyn DatabaseRow>>>> {
        let predicate = match (self.materializer.batch_key(), ids.len()) {
            (BatchKey::Id, 1) => Predicate::ById,
            (BatchKey::Parent, 1) => Predicate::ByParentId,
            (BatchKey::Id, _) => Predicate::BulkById(self.batch_size),
            (BatchKey::Parent, _) => Predicate::BulkByParentId(self.batch_size),
        };
        let statement = self.statements.get_or_create(&predicate)?;

        let mut grouped: HashMap<RowId, Vec<Box<dyn DatabaseRow>>> = HashMap::new();
        for chunk in ids.chunks(self.batch_size) {
            let params = statement.id_params(chunk, self.sentinel_id)?;
            let rows = source.fetch_all(statement.sql(), &params).await?;
            report.queries += 1;
            report.rows += rows.len();

            for row in rows {
                match row.try_get::<i64>(&self.key_column)? {
                    Some(key) => grouped.entry(key).or_default().push(row),
                    None => tracing::warn!(
                        "{} row without '{}' ignored",
                        self.materializer.name(),
                        self.key_column
                    ),
                }
            }
        }

        Ok(grouped)
    }
}
