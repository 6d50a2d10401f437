//! Exported object model
//!
//! Plain data produced by the exporters. Shared sub-objects are held behind
//! `Arc`s; repeated or cyclic references are [`ReferenceToken`]s, never real
//! back-pointers.
//!
//! [`ReferenceToken`]: crate::identity::ReferenceToken

pub mod appearance;
pub mod attribute;
pub mod feature;
pub mod geometry;

pub use appearance::{Appearance, AppearanceProperty, SurfaceData, SurfaceDataKind};
pub use attribute::{AttributeKind, AttributeValue, GenericAttribute};
pub use feature::{unshare, Feature, SharedFeature};
pub use geometry::{
    FeatureGeometry, GeometryFamily, GeometryKind, GeometryMember, GeometryObject, GeometryProperty,
    ImplicitGeometry, ImplicitGeometryProperty, ImplicitValue, ResolvedGeometry,
};
