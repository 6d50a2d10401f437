use crate::identity::ReferenceToken;
use crate::loading::Slot;
use serde::Serialize;
use std::sync::Arc;

/// Closed set of geometry kinds a row can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeometryKind {
    Geometry,
    Surface,
    Polygon,
    CompositeSurface,
    TriangulatedSurface,
    MultiSurface,
    MultiPolygon,
    Solid,
    CompositeSolid,
    MultiSolid,
}

impl GeometryKind {
    /// Map a stored type id; `None` for ids outside the supported set
    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            1 => Some(GeometryKind::Polygon),
            2 => Some(GeometryKind::CompositeSurface),
            3 => Some(GeometryKind::MultiSurface),
            4 => Some(GeometryKind::TriangulatedSurface),
            5 => Some(GeometryKind::Solid),
            6 => Some(GeometryKind::CompositeSolid),
            7 => Some(GeometryKind::MultiSolid),
            8 => Some(GeometryKind::MultiPolygon),
            9 => Some(GeometryKind::Surface),
            10 => Some(GeometryKind::Geometry),
            _ => None,
        }
    }

    pub fn type_id(&self) -> i32 {
        match self {
            GeometryKind::Polygon => 1,
            GeometryKind::CompositeSurface => 2,
            GeometryKind::MultiSurface => 3,
            GeometryKind::TriangulatedSurface => 4,
            GeometryKind::Solid => 5,
            GeometryKind::CompositeSolid => 6,
            GeometryKind::MultiSolid => 7,
            GeometryKind::MultiPolygon => 8,
            GeometryKind::Surface => 9,
            GeometryKind::Geometry => 10,
        }
    }

    /// Property family a value of this kind is assigned to
    pub fn family(&self) -> GeometryFamily {
        match self {
            GeometryKind::Surface
            | GeometryKind::Polygon
            | GeometryKind::CompositeSurface
            | GeometryKind::TriangulatedSurface => GeometryFamily::Surface,
            GeometryKind::MultiSurface | GeometryKind::MultiPolygon => GeometryFamily::MultiSurface,
            GeometryKind::Solid | GeometryKind::CompositeSolid => GeometryFamily::Solid,
            GeometryKind::MultiSolid => GeometryFamily::MultiSolid,
            GeometryKind::Geometry => GeometryFamily::Geometry,
        }
    }
}

/// Property families of a feature's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GeometryFamily {
    Geometry,
    Surface,
    MultiSurface,
    Solid,
    MultiSolid,
}

/// A materialized geometry tree node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryObject {
    pub id: i64,
    pub gml_id: Option<String>,
    pub kind: GeometryKind,
    pub reversed: bool,
    /// Encoded coordinates, passed through untouched
    pub payload: Option<String>,
    pub members: Vec<GeometryMember>,
}

impl GeometryObject {
    /// Ids of this node and every inline member
    pub fn ids(&self) -> Vec<i64> {
        let mut ids = vec![self.id];
        for member in &self.members {
            if let GeometryMember::Inline(object) = member {
                ids.extend(object.ids());
            }
        }
        ids
    }
}

/// Member of an aggregate geometry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GeometryMember {
    Inline(GeometryObject),
    Reference(ReferenceToken),
}

/// Value delivered for a requested geometry id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolvedGeometry {
    Object(GeometryObject),
    /// Already emitted elsewhere in the job
    Reference(ReferenceToken),
}

impl ResolvedGeometry {
    pub fn as_object(&self) -> Option<&GeometryObject> {
        match self {
            ResolvedGeometry::Object(object) => Some(object),
            ResolvedGeometry::Reference(_) => None,
        }
    }
}

/// Geometry assigned to a feature property, dispatched by family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GeometryProperty {
    Geometry(Arc<ResolvedGeometry>),
    Surface(Arc<ResolvedGeometry>),
    MultiSurface(Arc<ResolvedGeometry>),
    Solid(Arc<ResolvedGeometry>),
    MultiSolid(Arc<ResolvedGeometry>),
    Reference(ReferenceToken),
}

impl GeometryProperty {
    pub fn from_resolved(resolved: Arc<ResolvedGeometry>) -> Self {
        let family = match resolved.as_ref() {
            ResolvedGeometry::Object(object) => object.kind.family(),
            ResolvedGeometry::Reference(token) => return GeometryProperty::Reference(token.clone()),
        };
        match family {
            GeometryFamily::Geometry => GeometryProperty::Geometry(resolved),
            GeometryFamily::Surface => GeometryProperty::Surface(resolved),
            GeometryFamily::MultiSurface => GeometryProperty::MultiSurface(resolved),
            GeometryFamily::Solid => GeometryProperty::Solid(resolved),
            GeometryFamily::MultiSolid => GeometryProperty::MultiSolid(resolved),
        }
    }

    pub fn resolved(&self) -> Option<&ResolvedGeometry> {
        match self {
            GeometryProperty::Geometry(value)
            | GeometryProperty::Surface(value)
            | GeometryProperty::MultiSurface(value)
            | GeometryProperty::Solid(value)
            | GeometryProperty::MultiSolid(value) => Some(value.as_ref()),
            GeometryProperty::Reference(_) => None,
        }
    }
}

/// Named geometry property of a feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureGeometry {
    pub name: String,
    pub value: GeometryProperty,
}

/// Prototype geometry shared by many placements
#[derive(Debug, Clone, Serialize)]
pub struct ImplicitGeometry {
    pub id: i64,
    pub gml_id: Option<String>,
    pub mime_type: Option<String>,
    /// URI of an external library object
    pub library_object: Option<String>,
    /// Relative geometry, filled by the geometry flush
    pub relative_geometry: Option<Slot<ResolvedGeometry>>,
}

/// Implicit geometry value of a placement
#[derive(Debug, Clone, Serialize)]
pub enum ImplicitValue {
    Object(Arc<ImplicitGeometry>),
    Reference(ReferenceToken),
}

/// Placement of an implicit geometry on a feature
#[derive(Debug, Clone, Serialize)]
pub struct ImplicitGeometryProperty {
    pub name: String,
    pub transformation: Option<String>,
    pub reference_point: Option<String>,
    pub value: ImplicitValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids_round_trip_for_every_kind() {
        for type_id in 1..=10 {
            let kind = GeometryKind::from_type_id(type_id).unwrap();
            assert_eq!(kind.type_id(), type_id);
        }
        assert_eq!(GeometryKind::from_type_id(99), None);
    }

    #[test]
    fn test_property_dispatch_by_family() {
        let solid = Arc::new(ResolvedGeometry::Object(GeometryObject {
            id: 1,
            gml_id: None,
            kind: GeometryKind::CompositeSolid,
            reversed: false,
            payload: None,
            members: Vec::new(),
        }));
        assert!(matches!(GeometryProperty::from_resolved(solid), GeometryProperty::Solid(_)));

        let token = ReferenceToken::external("shared");
        let reference = Arc::new(ResolvedGeometry::Reference(token.clone()));
        assert_eq!(GeometryProperty::from_resolved(reference), GeometryProperty::Reference(token));
    }
}
