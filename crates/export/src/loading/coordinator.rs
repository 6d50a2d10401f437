use crate::backends::DataSource;
use crate::context::ExportContext;
use crate::error::{ExportError, ExportResult};
use crate::loading::executor::{BatchReport, BatchedExporter, RowMaterializer};
use async_trait::async_trait;

/// Object-safe view of a batched sub-exporter
#[async_trait]
pub trait BatchFlush: Send {
    fn name(&self) -> &'static str;

    /// Distinct ids waiting for a flush
    fn pending(&self) -> usize;

    async fn flush(&mut self, source: &dyn DataSource, ctx: &mut ExportContext) -> ExportResult<BatchReport>;

    /// Drop pending requests without invoking setters
    fn clear(&mut self) -> usize;
}

#[async_trait]
impl<M: RowMaterializer> BatchFlush for BatchedExporter<M> {
    fn name(&self) -> &'static str {
        BatchedExporter::name(self)
    }

    fn pending(&self) -> usize {
        BatchedExporter::pending(self)
    }

    async fn flush(&mut self, source: &dyn DataSource, ctx: &mut ExportContext) -> ExportResult<BatchReport> {
        self.execute_batch(source, ctx).await
    }

    fn clear(&mut self) -> usize {
        self.clear_batch()
    }
}

/// Reports of one coordinated flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub rounds: usize,
    pub reports: Vec<BatchReport>,
}

impl FlushSummary {
    pub fn queries(&self) -> usize {
        self.reports.iter().map(|report| report.queries).sum()
    }

    pub fn setters_fired(&self) -> usize {
        self.reports.iter().map(|report| report.setters_fired).sum()
    }

    pub fn dangling(&self) -> usize {
        self.reports.iter().map(|report| report.dangling.len()).sum()
    }
}

/// Flushes sub-exporters until every queue is empty.
///
/// Setters fired by one sub-exporter may enqueue into another, so flushing
/// runs in rounds, bounded by `max_rounds`.
#[derive(Debug, Clone, Copy)]
pub struct BatchCoordinator {
    max_rounds: usize,
}

impl BatchCoordinator {
    pub fn new(max_rounds: usize) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
        }
    }

    pub async fn flush_all(
        &self,
        exporters: &mut [&mut dyn BatchFlush],
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<FlushSummary> {
        let mut summary = FlushSummary::default();

        for round in 1..=self.max_rounds {
            if pending(exporters) == 0 {
                return Ok(summary);
            }
            summary.rounds = round;

            for exporter in exporters.iter_mut() {
                if exporter.pending() == 0 {
                    continue;
                }
                match exporter.flush(source, ctx).await {
                    Ok(report) => summary.reports.push(report),
                    Err(err) => {
                        let dropped = self.abort(exporters);
                        tracing::error!("Flush failed, dropped {} pending requests: {}", dropped, err);
                        return Err(err);
                    }
                }
            }
        }

        let remaining = pending(exporters);
        if remaining == 0 {
            return Ok(summary);
        }

        self.abort(exporters);
        Err(ExportError::FlushLimit {
            rounds: self.max_rounds,
            pending: remaining,
        })
    }

    /// Clear every queue without invoking setters
    pub fn abort(&self, exporters: &mut [&mut dyn BatchFlush]) -> usize {
        exporters.iter_mut().map(|exporter| exporter.clear()).sum()
    }
}

fn pending(exporters: &[&mut dyn BatchFlush]) -> usize {
    exporters.iter().map(|exporter| exporter.pending()).sum()
}
