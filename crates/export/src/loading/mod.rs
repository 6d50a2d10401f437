/// Deferred batch loading for the export engine
/// Provides the batch queue, single-assignment slots, the batch executor and
/// the coordinator that flushes sub-exporters until their queues settle

pub mod batch_queue;
pub mod coordinator;
pub mod executor;
pub mod slot;

pub use batch_queue::{BatchQueue, PendingBatch, RowId, Setter};
pub use coordinator::{BatchCoordinator, BatchFlush, FlushSummary};
pub use executor::{BatchKey, BatchReport, BatchedExporter, RowMaterializer};
pub use slot::Slot;
