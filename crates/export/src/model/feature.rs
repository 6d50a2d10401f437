use super::{AppearanceProperty, FeatureGeometry, GenericAttribute, ImplicitGeometryProperty};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Top-level exported object
#[derive(Debug, Clone, Default, Serialize)]
pub struct Feature {
    pub id: i64,
    pub gml_id: Option<String>,
    pub feature_type: String,
    pub attributes: Vec<GenericAttribute>,
    pub geometries: Vec<FeatureGeometry>,
    pub implicit_geometries: Vec<ImplicitGeometryProperty>,
    pub appearances: Vec<AppearanceProperty>,
    /// Content written by extension delegates, keyed by extension table
    pub extensions: BTreeMap<String, JsonValue>,
}

impl Feature {
    pub fn new(id: i64, feature_type: &str) -> Self {
        Self {
            id,
            feature_type: feature_type.to_string(),
            ..Self::default()
        }
    }

    /// Wrap the feature so deferred setters can fill it
    pub fn into_shared(self) -> SharedFeature {
        Arc::new(Mutex::new(self))
    }

    pub fn geometry(&self, name: &str) -> Option<&FeatureGeometry> {
        self.geometries.iter().find(|geometry| geometry.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&GenericAttribute> {
        self.attributes.iter().find_map(|attribute| attribute.find(name))
    }
}

/// Feature under construction, shared with pending setters
pub type SharedFeature = Arc<Mutex<Feature>>;

/// Take the feature back once no setter holds it
pub fn unshare(shared: SharedFeature) -> Feature {
    match Arc::try_unwrap(shared) {
        Ok(feature) => feature.into_inner(),
        Err(shared) => shared.lock().clone(),
    }
}
