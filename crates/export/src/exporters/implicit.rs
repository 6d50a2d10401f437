use super::geometry::GeometryExporter;
use crate::backends::{DataSource, DatabaseRowExt};
use crate::config::ExportConfig;
use crate::context::ExportContext;
use crate::error::ExportResult;
use crate::identity::{ContentDigest, IdentityKey, IdentityKind, ReferenceToken};
use crate::loading::Slot;
use crate::model::{ImplicitGeometry, ImplicitValue};
use crate::reporting::ExportIssue;
use crate::statement::{Predicate, Projection, StatementCache};
use std::collections::HashMap;
use std::sync::Arc;

const NAME: &str = "implicit_geometry";

/// Prototype geometries shared by many placements.
///
/// Resolved synchronously, one row per prototype. A prototype is keyed by its
/// gml:id, else by its own row id when it carries a relative geometry, else by
/// a digest of the library object it points at. The first placement
/// materializes it; every later one gets a reference token.
pub struct ImplicitGeometryExporter {
    statements: StatementCache,
    sentinel_id: i64,
    known: HashMap<i64, IdentityKey>,
}

impl ImplicitGeometryExporter {
    pub fn new(config: &ExportConfig) -> ExportResult<Self> {
        let projection = Projection::new(NAME, "implicit_geometry", "ig").columns([
            "ig.id",
            "ig.gmlid",
            "ig.mime_type",
            "ig.reference_to_library",
            "ig.relative_brep_id",
        ]);

        Ok(Self {
            statements: StatementCache::new(projection, *config.get_dialect())?,
            sentinel_id: *config.get_sentinel_id(),
            known: HashMap::new(),
        })
    }

    /// Resolve one placement's prototype.
    ///
    /// The relative geometry is deferred into `geometry`'s queue and lands in
    /// the returned prototype's slot when that queue is flushed.
    pub async fn export(
        &mut self,
        id: i64,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
        geometry: &mut GeometryExporter,
    ) -> ExportResult<Option<ImplicitValue>> {
        if let Some(key) = self.known.get(&id) {
            return Ok(Some(ImplicitValue::Reference(ReferenceToken::for_key(key))));
        }

        let statement = self.statements.get_or_create(&Predicate::ById)?;
        let params = statement.id_params(&[id], self.sentinel_id)?;
        let rows = source.fetch_all(statement.sql(), &params).await?;
        let Some(row) = rows.first() else {
            ctx.reporter.report(ExportIssue::dangling(NAME, id))?;
            return Ok(None);
        };

        let gml_id: Option<String> = row.try_get("gmlid")?;
        let mime_type: Option<String> = row.try_get("mime_type")?;
        let library_object: Option<String> = row.try_get("reference_to_library")?;
        let relative_brep: Option<i64> = row.try_get("relative_brep_id")?;

        let key = match (&gml_id, relative_brep, &library_object) {
            (Some(gml_id), _, _) => IdentityKey::external(gml_id.clone()),
            (None, Some(_), _) | (None, None, None) => IdentityKey::row(NAME, id),
            (None, None, Some(uri)) => IdentityKey::Content(ContentDigest::of_parts([
                uri.as_bytes(),
                mime_type.as_deref().unwrap_or_default().as_bytes(),
            ])),
        };
        self.known.insert(id, key.clone());

        if ctx
            .identity
            .lookup_or_register(key.clone(), Some(id), IdentityKind::ImplicitGeometry)
        {
            tracing::trace!("Implicit geometry #{} shares prototype {}", id, key);
            return Ok(Some(ImplicitValue::Reference(ReferenceToken::for_key(&key))));
        }

        let relative_geometry = relative_brep.map(|brep_id| {
            let slot = Slot::new();
            geometry.add_batch(brep_id, slot.setter());
            slot
        });

        Ok(Some(ImplicitValue::Object(Arc::new(ImplicitGeometry {
            id,
            gml_id: gml_id.or_else(|| Some(key.object_id())),
            mime_type,
            library_object,
            relative_geometry,
        }))))
    }
}
