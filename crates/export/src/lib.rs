//! # strata-export: Batched Deferred Graph Exporter
//!
//! Turns flat relational rows into nested, deduplicated object graphs while
//! keeping the number of round trips bounded. Sub-exporters queue requests
//! for row ids together with setters; queues are flushed in bulk and each
//! materialized object is handed to every setter waiting on its id.
//!
//! The crate is organized in layers:
//! - [`backends`]: the row source abstraction (PostgreSQL and in-memory)
//! - [`statement`]: projections rendered into cached bulk statements
//! - [`loading`]: batch queues, the batched executor and the flush coordinator
//! - [`identity`], [`dedup`], [`tree`]: per-job identity tracking, reuse caches
//!   and out-of-order hierarchy assembly
//! - [`exporters`]: the feature, geometry, implicit geometry, appearance and
//!   generic attribute exporters, driven by an [`ExportJob`]

pub mod backends;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod exporters;
pub mod extension;
pub mod identity;
pub mod loading;
pub mod model;
pub mod reporting;
pub mod statement;
pub mod tree;

// Re-export the main entry points
pub use backends::{DataSource, DatabaseRow, DatabaseRowExt, DatabaseValue, SqlDialect};
pub use config::{AppearanceMode, ExportConfig, ExportConfigBuilder};
pub use context::{ExportContext, JobSummary};
pub use error::{ExportError, ExportResult};
pub use exporters::{ExportJob, FeatureMapping, JobOutput};
pub use extension::{ExtensionDelegate, ExtensionRequest, PropertyFilter};
pub use identity::{IdentityKey, ReferenceToken};
pub use loading::{BatchCoordinator, BatchKey, BatchedExporter, RowMaterializer, Slot};
pub use reporting::{ErrorPolicy, ErrorReporter, IssueKind};
