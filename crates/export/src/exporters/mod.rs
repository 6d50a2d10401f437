//! Domain exporters built on the batch engine
//!
//! [`ExportJob`] drives a page-wise export of one feature type. Geometry is
//! deferred into a [`BatchedExporter`](crate::loading::BatchedExporter) and
//! fetched in bulk per page; implicit geometries, appearances and generic
//! attributes are resolved per feature and deduplicated through the job
//! context.

pub mod appearance;
pub mod attribute;
pub mod feature;
pub mod geometry;
pub mod implicit;
pub mod job;

pub use appearance::AppearanceExporter;
pub use attribute::AttributeExporter;
pub use feature::{FeatureExporter, FeatureMapping, FeatureRefs, ImplicitRef};
pub use geometry::{GeometryExporter, GeometryMaterializer};
pub use implicit::ImplicitGeometryExporter;
pub use job::{ExportJob, JobOutput};
