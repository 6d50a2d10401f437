use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::config::ExportConfig;
use crate::context::ExportContext;
use crate::error::ExportResult;
use crate::model::{AttributeKind, AttributeValue, GenericAttribute};
use crate::reporting::ExportIssue;
use crate::statement::{Predicate, Projection, StatementCache};
use crate::tree::{TreeCache, TreeNode};

const NAME: &str = "generic_attribute";

/// Generic attributes of a feature, reassembled into nested sets
pub struct AttributeExporter {
    statements: StatementCache,
    sentinel_id: i64,
    tree: TreeCache<GenericAttribute>,
}

impl AttributeExporter {
    pub fn new(config: &ExportConfig) -> ExportResult<Self> {
        let projection = Projection::new(NAME, "cityobject_genericattrib", "ga")
            .columns([
                "ga.id",
                "ga.parent_genattrib_id",
                "ga.cityobject_id",
                "ga.attrname",
                "ga.datatype",
                "ga.strval",
                "ga.intval",
                "ga.realval",
                "ga.urival",
                "ga.dateval",
                "ga.unit",
            ])
            .parent_column("ga.cityobject_id")
            .order_by("ga.id");

        Ok(Self {
            statements: StatementCache::new(projection, *config.get_dialect())?,
            sentinel_id: *config.get_sentinel_id(),
            tree: TreeCache::new(),
        })
    }

    pub async fn export_for_feature(
        &mut self,
        feature_id: i64,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<Vec<GenericAttribute>> {
        let statement = self.statements.get_or_create(&Predicate::ByParentId)?;
        let params = statement.id_params(&[feature_id], self.sentinel_id)?;
        let rows = source.fetch_all(statement.sql(), &params).await?;

        let mut tree = self.tree.session();
        for row in &rows {
            let id: i64 = row.get("id")?;
            let datatype: Option<i32> = row.try_get("datatype")?;
            let Some(kind) = datatype.and_then(AttributeKind::from_type_id) else {
                let datatype = datatype.map_or_else(|| "NULL".to_string(), |datatype| datatype.to_string());
                ctx.reporter.report(ExportIssue::unsupported_type(NAME, id, datatype))?;
                continue;
            };

            match read_attribute(row.as_ref(), kind) {
                Ok(attribute) => {
                    tree.attach(id, row.try_get("parent_genattrib_id")?, attribute);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => ctx.reporter.report(ExportIssue::row_failure(NAME, id, &err))?,
            }
        }

        let assembled = tree.finish();
        Ok(assembled.roots.into_iter().map(into_attribute).collect())
    }
}

fn read_attribute(row: &dyn DatabaseRow, kind: AttributeKind) -> ExportResult<GenericAttribute> {
    let value = match kind {
        AttributeKind::String => AttributeValue::String(row.get("strval")?),
        AttributeKind::Integer => AttributeValue::Integer(row.get("intval")?),
        AttributeKind::Double => AttributeValue::Double(row.get("realval")?),
        AttributeKind::Uri => AttributeValue::Uri(row.get("urival")?),
        AttributeKind::Date => AttributeValue::Date(row.get("dateval")?),
        AttributeKind::Measure => AttributeValue::Measure {
            value: row.get("realval")?,
            uom: row.try_get("unit")?,
        },
        AttributeKind::Set => AttributeValue::Set(Vec::new()),
    };

    Ok(GenericAttribute {
        name: row.get("attrname")?,
        value,
    })
}

fn into_attribute(node: TreeNode<GenericAttribute>) -> GenericAttribute {
    let TreeNode {
        id,
        payload: mut attribute,
        children,
    } = node;

    match &mut attribute.value {
        AttributeValue::Set(members) => members.extend(children.into_iter().map(into_attribute)),
        _ if !children.is_empty() => {
            tracing::warn!(
                "Attribute #{} ({}) is not a set, dropping {} nested attributes",
                id,
                attribute.name,
                children.len()
            );
        }
        _ => {}
    }
    attribute
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfigBuilder;
    use crate::backends::{DatabaseValue, MemoryRow, MemorySource};
    use crate::reporting::{ErrorPolicy, IssueKind};

    fn attribute(id: i64, parent: Option<i64>, name: &str, datatype: i32) -> MemoryRow {
        MemoryRow::new()
            .with("id", id)
            .with("parent_genattrib_id", parent)
            .with("cityobject_id", 5i64)
            .with("attrname", name)
            .with("datatype", datatype)
    }

    fn rows() -> Vec<MemoryRow> {
        vec![
            attribute(4, Some(3), "height", 6).with("realval", 12.5).with("unit", "m"),
            attribute(1, None, "owner", 1).with("strval", "city"),
            attribute(3, None, "measures", 7),
            attribute(5, Some(3), "floors", 2).with("intval", 4i64),
            attribute(6, None, "legacy", 42),
            attribute(7, None, "broken", 2).with("intval", DatabaseValue::Null),
        ]
    }

    async fn export(policy: ErrorPolicy, rows: Vec<MemoryRow>) -> (ExportResult<Vec<GenericAttribute>>, ExportContext) {
        let config = ExportConfigBuilder::new()
            .error_policy(policy)
            .build()
            .expect("Failed to build config");
        let source = MemorySource::new().with_table("cityobject_genericattrib", rows);
        let mut ctx = ExportContext::new(config.clone());
        let mut exporter = AttributeExporter::new(&config).unwrap();
        let result = exporter.export_for_feature(5, &source, &mut ctx).await;
        (result, ctx)
    }

    #[tokio::test]
    async fn test_nested_sets_from_unordered_rows() {
        let (result, ctx) = export(ErrorPolicy::LogAndContinue, rows()).await;
        let attributes = result.unwrap();

        let names: Vec<&str> = attributes.iter().map(|attribute| attribute.name.as_str()).collect();
        assert_eq!(names, vec!["owner", "measures"]);

        let AttributeValue::Set(members) = &attributes[1].value else {
            panic!("measures should be a set");
        };
        assert_eq!(
            members[0].value,
            AttributeValue::Measure {
                value: 12.5,
                uom: Some("m".to_string())
            }
        );
        assert_eq!(members[1].value, AttributeValue::Integer(4));
        assert_eq!(attributes[1].find("floors").map(|a| &a.value), Some(&AttributeValue::Integer(4)));

        assert_eq!(ctx.reporter.count(IssueKind::UnsupportedType), 1);
        assert_eq!(ctx.reporter.count(IssueKind::RowFailure), 1);
    }

    #[tokio::test]
    async fn test_row_order_does_not_matter() {
        let (forward, _) = export(ErrorPolicy::LogAndContinue, rows()).await;
        let mut reversed = rows();
        reversed.reverse();
        let (backward, _) = export(ErrorPolicy::LogAndContinue, reversed).await;

        let backward = backward.unwrap();
        let measures = backward.iter().find(|attribute| attribute.name == "measures").unwrap();
        let forward = forward.unwrap();
        let expected = forward.iter().find(|attribute| attribute.name == "measures").unwrap();
        let AttributeValue::Set(members) = &measures.value else {
            panic!("measures should be a set");
        };
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|member| expected.find(&member.name) == Some(member)));
    }

    #[tokio::test]
    async fn test_tree_released_after_failure() {
        let config = ExportConfigBuilder::new()
            .error_policy(ErrorPolicy::Abort)
            .build()
            .expect("Failed to build config");
        let source = MemorySource::new().with_table("cityobject_genericattrib", rows());
        let mut ctx = ExportContext::new(config.clone());
        let mut exporter = AttributeExporter::new(&config).unwrap();

        let err = exporter.export_for_feature(5, &source, &mut ctx).await.unwrap_err();
        assert!(matches!(err, crate::error::ExportError::Aborted(_)));
        assert!(exporter.tree.is_empty());
    }

    #[tokio::test]
    async fn test_feature_without_attributes() {
        let (result, ctx) = export(ErrorPolicy::Abort, Vec::new()).await;
        assert!(result.unwrap().is_empty());
        assert_eq!(ctx.reporter.summary().total(), 0);
    }
}
