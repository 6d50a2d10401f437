use crate::backends::{DatabaseRow, DatabaseRowExt};
use crate::context::ExportContext;
use crate::error::{ExportError, ExportResult};
use crate::identity::{IdentityKey, IdentityKind, ReferenceToken};
use crate::loading::{BatchKey, BatchedExporter, RowId, RowMaterializer};
use crate::model::{GeometryKind, GeometryMember, GeometryObject, ResolvedGeometry};
use crate::reporting::ExportIssue;
use crate::statement::Projection;
use crate::tree::{AttachOutcome, TreeCache, TreeNode};

const NAME: &str = "geometry";

/// Geometry trees requested by root id, resolved in bulk per flush
pub type GeometryExporter = BatchedExporter<GeometryMaterializer>;

/// One `surface_geometry` row, before tree assembly
#[derive(Debug, Clone)]
struct GeometryRow {
    gml_id: Option<String>,
    type_id: Option<i32>,
    reversed: bool,
    xlink: bool,
    payload: Option<String>,
}

impl GeometryRow {
    fn read(row: &dyn DatabaseRow) -> ExportResult<Self> {
        Ok(Self {
            gml_id: row.try_get("gmlid")?,
            type_id: row.try_get("type_id")?,
            reversed: row.try_get("is_reverse")?.unwrap_or(false),
            xlink: row.try_get("is_xlink")?.unwrap_or(false),
            payload: row.try_get("geometry")?,
        })
    }
}

/// Materializes geometry trees, batched by root geometry id.
///
/// Every row of a tree carries its root id, so one bulk fetch by root brings
/// in whole trees. Nodes with a gml:id are registered in the identity cache
/// before their members are visited; a node seen again anywhere in the job
/// becomes a reference token.
#[derive(Debug, Default)]
pub struct GeometryMaterializer {
    tree: TreeCache<GeometryRow>,
    surfaces: Vec<i64>,
}

impl GeometryMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the nodes materialized since the last call
    pub fn drain_surface_ids(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.surfaces)
    }

    fn convert(&mut self, node: TreeNode<GeometryRow>, ctx: &mut ExportContext) -> ExportResult<Option<GeometryMember>> {
        let TreeNode {
            id,
            payload: row,
            children,
        } = node;

        if row.xlink {
            return match row.gml_id {
                Some(target) => Ok(Some(GeometryMember::Reference(ReferenceToken::external(&target)))),
                None => Err(ExportError::column("gmlid", format!("xlink geometry #{} names no target", id))),
            };
        }

        let Some(kind) = row.type_id.and_then(GeometryKind::from_type_id) else {
            let type_id = row.type_id.map_or_else(|| "NULL".to_string(), |type_id| type_id.to_string());
            ctx.reporter.report(ExportIssue::unsupported_type(NAME, id, type_id))?;
            return Ok(None);
        };

        let mut members = Vec::with_capacity(children.len());
        for child in children {
            if !child.payload.xlink {
                if let Some(gml_id) = child.payload.gml_id.as_deref() {
                    let key = IdentityKey::external(gml_id);
                    if ctx
                        .identity
                        .lookup_or_register(key.clone(), Some(child.id), IdentityKind::Geometry)
                    {
                        members.push(GeometryMember::Reference(ReferenceToken::for_key(&key)));
                        continue;
                    }
                }
            }
            if let Some(member) = self.convert(child, ctx)? {
                members.push(member);
            }
        }

        self.surfaces.push(id);
        Ok(Some(GeometryMember::Inline(GeometryObject {
            id,
            gml_id: row.gml_id,
            kind,
            reversed: row.reversed,
            payload: row.payload,
            members,
        })))
    }
}

fn root_key(id: i64, gml_id: Option<&str>) -> IdentityKey {
    match gml_id {
        Some(gml_id) => IdentityKey::external(gml_id),
        None => IdentityKey::row(NAME, id),
    }
}

impl RowMaterializer for GeometryMaterializer {
    type Output = ResolvedGeometry;

    fn name(&self) -> &'static str {
        NAME
    }

    fn projection(&self) -> Projection {
        Projection::new(NAME, "surface_geometry", "g")
            .columns([
                "g.id",
                "g.gmlid",
                "g.parent_id",
                "g.root_id",
                "g.type_id",
                "g.is_reverse",
                "g.is_xlink",
                "g.geometry",
            ])
            .parent_column("g.root_id")
            .order_by("g.id")
    }

    fn batch_key(&self) -> BatchKey {
        BatchKey::Parent
    }

    fn materialize(
        &mut self,
        root_id: RowId,
        rows: &[Box<dyn DatabaseRow>],
        ctx: &mut ExportContext,
    ) -> ExportResult<Option<ResolvedGeometry>> {
        let assembled = {
            let mut tree = self.tree.session();
            for row in rows {
                let id: i64 = row.get("id")?;
                let parent_id: Option<i64> = row.try_get("parent_id")?;
                if tree.attach(id, parent_id, GeometryRow::read(row.as_ref())?) == AttachOutcome::Duplicate {
                    tracing::debug!("Duplicate geometry row #{} ignored", id);
                }
            }
            tree.finish()
        };

        let Some(root) = assembled.roots.into_iter().find(|node| node.id == root_id) else {
            return Err(ExportError::Query(format!("Geometry tree #{} has no root row", root_id)));
        };

        let key = root_key(root.id, root.payload.gml_id.as_deref());
        if ctx
            .identity
            .lookup_or_register(key.clone(), Some(root.id), IdentityKind::Geometry)
        {
            return Ok(Some(ResolvedGeometry::Reference(ReferenceToken::for_key(&key))));
        }

        Ok(self.convert(root, ctx)?.map(|member| match member {
            GeometryMember::Inline(mut object) => {
                object.gml_id.get_or_insert_with(|| key.object_id());
                ResolvedGeometry::Object(object)
            }
            GeometryMember::Reference(token) => ResolvedGeometry::Reference(token),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseValue, MemoryRow, MemorySource};
    use crate::config::{ExportConfig, ExportConfigBuilder};
    use crate::loading::Slot;
    use crate::reporting::{ErrorPolicy, IssueKind};

    fn node(id: i64, parent: Option<i64>, root: i64, type_id: i32) -> MemoryRow {
        MemoryRow::new()
            .with("id", id)
            .with("gmlid", DatabaseValue::Null)
            .with("parent_id", parent)
            .with("root_id", root)
            .with("type_id", type_id)
            .with("is_reverse", false)
            .with("is_xlink", false)
            .with("geometry", DatabaseValue::Null)
    }

    fn polygon(id: i64, parent: i64, root: i64) -> MemoryRow {
        node(id, Some(parent), root, 1).with("geometry", format!("POLYGON(({}))", id))
    }

    fn source() -> MemorySource {
        MemorySource::new().with_table(
            "surface_geometry",
            vec![
                // children arrive before their parent
                polygon(12, 11, 10),
                polygon(13, 11, 10),
                node(11, Some(10), 10, 2).with("gmlid", "shell-11"),
                node(10, None, 10, 5).with("gmlid", "solid-10"),
                node(20, None, 20, 3),
                polygon(21, 20, 20),
                node(22, Some(20), 20, 1).with("gmlid", "shell-11").with("is_xlink", true),
                node(30, None, 30, 3),
                node(31, Some(30), 30, 99),
                polygon(32, 30, 30),
            ],
        )
    }

    fn exporter(config: &ExportConfig) -> GeometryExporter {
        GeometryExporter::new(GeometryMaterializer::new(), config).unwrap()
    }

    #[tokio::test]
    async fn test_tree_assembled_from_unordered_rows() {
        let source = source();
        let config = ExportConfig::default();
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);
        let solid = Slot::new();

        geometry.add_batch(10, solid.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        let resolved = solid.get().unwrap();
        let object = resolved.as_object().unwrap();
        assert_eq!(object.kind, GeometryKind::Solid);
        assert_eq!(object.gml_id.as_deref(), Some("solid-10"));

        let GeometryMember::Inline(shell) = &object.members[0] else {
            panic!("shell should be inline");
        };
        assert_eq!(shell.kind, GeometryKind::CompositeSurface);
        assert_eq!(shell.members.len(), 2);
        assert_eq!(object.ids(), vec![10, 11, 12, 13]);

        let mut surfaces = geometry.materializer_mut().drain_surface_ids();
        surfaces.sort_unstable();
        assert_eq!(surfaces, vec![10, 11, 12, 13]);
        assert!(geometry.materializer_mut().drain_surface_ids().is_empty());
    }

    #[tokio::test]
    async fn test_shared_members_become_tokens() {
        let source = source();
        let config = ExportConfig::default();
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);
        let solid = Slot::new();
        let multi = Slot::new();

        geometry.add_batch(10, solid.setter());
        geometry.add_batch(20, multi.setter());
        let report = geometry.execute_batch(&source, &mut ctx).await.unwrap();
        assert_eq!(report.queries, 1);

        let multi = multi.get().unwrap();
        let members = &multi.as_object().unwrap().members;
        assert_eq!(members.len(), 2);
        assert_eq!(
            members[1],
            GeometryMember::Reference(ReferenceToken::external("shell-11"))
        );
    }

    #[tokio::test]
    async fn test_root_seen_again_is_a_reference() {
        let source = source();
        let config = ExportConfig::default();
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);

        let first = Slot::new();
        geometry.add_batch(10, first.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        let second = Slot::new();
        geometry.add_batch(10, second.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        assert!(first.get().unwrap().as_object().is_some());
        assert_eq!(
            *second.get().unwrap(),
            ResolvedGeometry::Reference(ReferenceToken::external("solid-10"))
        );
    }

    #[tokio::test]
    async fn test_root_without_gml_id_carries_its_token_target() {
        let source = source();
        let config = ExportConfig::default();
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);

        let first = Slot::new();
        geometry.add_batch(20, first.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        let second = Slot::new();
        geometry.add_batch(20, second.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        let first = first.get().unwrap();
        let emitted = first.as_object().unwrap().gml_id.clone().unwrap();
        assert!(emitted.starts_with("UUID_"));
        let ResolvedGeometry::Reference(token) = second.get().unwrap().as_ref().clone() else {
            panic!("second request should be a reference");
        };
        assert_eq!(token.target(), emitted);
    }

    #[tokio::test]
    async fn test_unsupported_member_is_skipped() {
        let source = source();
        let config = ExportConfig::default();
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);
        let multi = Slot::new();

        geometry.add_batch(30, multi.setter());
        geometry.execute_batch(&source, &mut ctx).await.unwrap();

        let multi = multi.get().unwrap();
        assert_eq!(multi.as_object().unwrap().ids(), vec![30, 32]);
        assert_eq!(ctx.reporter.count(IssueKind::UnsupportedType), 1);
    }

    #[tokio::test]
    async fn test_unsupported_member_aborts_under_strict_policy() {
        let source = source();
        let config = ExportConfigBuilder::new()
            .error_policy(ErrorPolicy::Abort)
            .build()
            .expect("Failed to build config");
        let mut ctx = ExportContext::new(config.clone());
        let mut geometry = exporter(&config);

        geometry.add_batch(30, |_| {});
        let err = geometry.execute_batch(&source, &mut ctx).await.unwrap_err();
        assert!(matches!(err, ExportError::Aborted(_)));
    }
}
