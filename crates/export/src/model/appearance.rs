use crate::identity::ReferenceToken;
use serde::Serialize;
use std::sync::Arc;

/// Kind of surface data an appearance carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SurfaceDataKind {
    Material,
    ParameterizedTexture,
    GeoreferencedTexture,
}

impl SurfaceDataKind {
    pub fn from_type_id(type_id: i32) -> Option<Self> {
        match type_id {
            1 => Some(SurfaceDataKind::Material),
            2 => Some(SurfaceDataKind::ParameterizedTexture),
            3 => Some(SurfaceDataKind::GeoreferencedTexture),
            _ => None,
        }
    }
}

/// Surface data and the surface geometries it applies to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceData {
    pub id: i64,
    pub gml_id: Option<String>,
    pub kind: SurfaceDataKind,
    pub targets: Vec<i64>,
}

/// A themed appearance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appearance {
    pub id: i64,
    pub gml_id: Option<String>,
    pub theme: Option<String>,
    pub surface_data: Vec<SurfaceData>,
}

impl Appearance {
    /// Every surface geometry id targeted by this appearance
    pub fn targets(&self) -> impl Iterator<Item = i64> + '_ {
        self.surface_data.iter().flat_map(|data| data.targets.iter().copied())
    }
}

/// Appearance attached to a feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AppearanceProperty {
    Object(Arc<Appearance>),
    Reference(ReferenceToken),
}
