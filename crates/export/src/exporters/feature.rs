use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::config::ExportConfig;
use crate::error::ExportResult;
use crate::extension::ExtensionProbe;
use crate::model::Feature;
use crate::statement::{Join, Predicate, Projection, StatementCache};
use std::collections::BTreeSet;

const NAME: &str = "feature";

#[derive(Debug, Clone, PartialEq)]
struct ImplicitColumns {
    property: String,
    id_column: String,
    transformation_column: String,
    reference_point_column: String,
}

/// How one feature type is stored.
///
/// Features live in `cityobject` joined with their type table. Geometry and
/// implicit geometry properties are foreign key columns of the type table;
/// extension tables share the feature's id.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMapping {
    feature_type: String,
    table: String,
    alias: String,
    geometries: Vec<(String, String)>,
    implicits: Vec<ImplicitColumns>,
    extensions: Vec<(String, String)>,
}

impl FeatureMapping {
    pub fn new(feature_type: &str, table: &str, alias: &str) -> Self {
        Self {
            feature_type: feature_type.to_string(),
            table: table.to_string(),
            alias: alias.to_string(),
            geometries: Vec::new(),
            implicits: Vec::new(),
            extensions: Vec::new(),
        }
    }

    /// Geometry property stored as a root geometry id in `column`
    pub fn geometry(mut self, property: &str, column: &str) -> Self {
        self.geometries.push((property.to_string(), column.to_string()));
        self
    }

    pub fn implicit(
        mut self,
        property: &str,
        id_column: &str,
        transformation_column: &str,
        reference_point_column: &str,
    ) -> Self {
        self.implicits.push(ImplicitColumns {
            property: property.to_string(),
            id_column: id_column.to_string(),
            transformation_column: transformation_column.to_string(),
            reference_point_column: reference_point_column.to_string(),
        });
        self
    }

    /// Extension table keyed by the feature id
    pub fn extension(mut self, table: &str, alias: &str) -> Self {
        self.extensions.push((table.to_string(), alias.to_string()));
        self
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    fn projection(&self) -> Projection {
        let qualified = |column: &str| format!("{}.{}", self.alias, column);

        let mut columns = vec!["co.id".to_string(), "co.gmlid".to_string()];
        columns.extend(self.geometries.iter().map(|(_, column)| qualified(column)));
        for implicit in &self.implicits {
            columns.push(qualified(&implicit.id_column));
            columns.push(qualified(&implicit.transformation_column));
            columns.push(qualified(&implicit.reference_point_column));
        }

        let mut projection = Projection::new(NAME, "cityobject", "co").join(Join::inner(
            &self.table,
            &self.alias,
            "co",
            "co.id",
            &qualified("id"),
        ));
        for (table, alias) in &self.extensions {
            columns.push(format!("{}.id AS {}_id", alias, alias));
            projection = projection.join(Join::left(table, alias, "co", "co.id", &format!("{}.id", alias)));
        }

        projection.columns(columns).order_by("co.id")
    }

    fn probe(&self) -> ExtensionProbe {
        self.extensions
            .iter()
            .fold(ExtensionProbe::new(), |probe, (table, alias)| {
                probe.table(table, &format!("{}_id", alias))
            })
    }
}

/// Placement of an implicit geometry read from a feature row
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitRef {
    pub property: String,
    pub id: i64,
    pub transformation: Option<String>,
    pub reference_point: Option<String>,
}

/// Nested references of a feature row, resolved by the job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRefs {
    /// `(property, root geometry id)`
    pub geometries: Vec<(String, i64)>,
    pub implicits: Vec<ImplicitRef>,
    /// Extension tables with a row for this feature
    pub extensions: BTreeSet<String>,
}

/// Top-level exporter: reads feature rows by id
pub struct FeatureExporter {
    mapping: FeatureMapping,
    probe: ExtensionProbe,
    statements: StatementCache,
    batch_size: usize,
    sentinel_id: i64,
}

impl FeatureExporter {
    pub fn new(mapping: FeatureMapping, config: &ExportConfig) -> ExportResult<Self> {
        let statements = StatementCache::new(mapping.projection(), *config.get_dialect())?;
        Ok(Self {
            probe: mapping.probe(),
            mapping,
            statements,
            batch_size: *config.get_batch_size(),
            sentinel_id: *config.get_sentinel_id(),
        })
    }

    pub fn mapping(&self) -> &FeatureMapping {
        &self.mapping
    }

    /// Rows for a page of feature ids
    pub async fn fetch(&mut self, ids: &[i64], source: &dyn DataSource) -> ExportResult<Vec<Box<dyn DatabaseRow>>> {
        let predicate = match ids.len() {
            0 => return Ok(Vec::new()),
            1 => Predicate::ById,
            _ => Predicate::BulkById(self.batch_size),
        };
        let statement = self.statements.get_or_create(&predicate)?;

        let mut rows = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.batch_size) {
            let params = statement.id_params(chunk, self.sentinel_id)?;
            rows.extend(source.fetch_all(statement.sql(), &params).await?);
        }
        Ok(rows)
    }

    /// The feature's own columns and the references it carries
    pub fn build(&self, row: &dyn DatabaseRow) -> ExportResult<(Feature, FeatureRefs)> {
        let mut feature = Feature::new(row.get("id")?, &self.mapping.feature_type);
        feature.gml_id = row.try_get("gmlid")?;

        let mut refs = FeatureRefs::default();
        for (property, column) in &self.mapping.geometries {
            if let Some(geometry_id) = row.try_get::<i64>(column)? {
                refs.geometries.push((property.clone(), geometry_id));
            }
        }
        for implicit in &self.mapping.implicits {
            if let Some(id) = row.try_get::<i64>(&implicit.id_column)? {
                refs.implicits.push(ImplicitRef {
                    property: implicit.property.clone(),
                    id,
                    transformation: row.try_get(&implicit.transformation_column)?,
                    reference_point: row.try_get(&implicit.reference_point_column)?,
                });
            }
        }
        refs.extensions = self.probe.detect(row);

        Ok((feature, refs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseValue, MemoryRow, MemorySource};
    use crate::error::ExportError;

    fn mapping() -> FeatureMapping {
        FeatureMapping::new("Building", "building", "b")
            .geometry("lod1Solid", "lod1_solid_id")
            .geometry("lod2MultiSurface", "lod2_multi_surface_id")
            .implicit(
                "lod2ImplicitRepresentation",
                "lod2_implicit_rep_id",
                "lod2_implicit_transformation",
                "lod2_implicit_ref_point",
            )
            .extension("ade_noise_building", "nb")
    }

    #[test]
    fn test_projection_joins_type_and_extension_tables() {
        let sql = mapping().projection().render(&Predicate::ById, crate::backends::SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            sql,
            "SELECT co.id, co.gmlid, b.lod1_solid_id, b.lod2_multi_surface_id, b.lod2_implicit_rep_id, \
             b.lod2_implicit_transformation, b.lod2_implicit_ref_point, nb.id AS nb_id \
             FROM cityobject co INNER JOIN building b ON co.id = b.id \
             LEFT JOIN ade_noise_building nb ON co.id = nb.id WHERE co.id = $1 ORDER BY co.id"
        );
    }

    #[test]
    fn test_alias_clash_is_a_configuration_error() {
        let mapping = FeatureMapping::new("Building", "building", "co");
        let result = FeatureExporter::new(mapping, &ExportConfig::default());
        assert!(matches!(result, Err(ExportError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_build_reads_references() {
        let source = MemorySource::new().with_table(
            "cityobject",
            vec![
                MemoryRow::new()
                    .with("id", 1i64)
                    .with("gmlid", "bldg-1")
                    .with("lod1_solid_id", 10i64)
                    .with("lod2_multi_surface_id", DatabaseValue::Null)
                    .with("lod2_implicit_rep_id", 3i64)
                    .with("lod2_implicit_transformation", "1 0 0 0 1 0 0 0 1")
                    .with("lod2_implicit_ref_point", DatabaseValue::Null)
                    .with("nb_id", 1i64),
                MemoryRow::new().with("id", 2i64).with("nb_id", DatabaseValue::Null),
            ],
        );
        let mut exporter = FeatureExporter::new(mapping(), &ExportConfig::default()).unwrap();

        let rows = exporter.fetch(&[1, 2, 3], &source).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.fetch_count(), 1);

        let (feature, refs) = exporter.build(rows[0].as_ref()).unwrap();
        assert_eq!(feature.gml_id.as_deref(), Some("bldg-1"));
        assert_eq!(feature.feature_type, "Building");
        assert_eq!(refs.geometries, vec![("lod1Solid".to_string(), 10)]);
        assert_eq!(refs.implicits[0].id, 3);
        assert_eq!(refs.implicits[0].reference_point, None);
        assert!(refs.extensions.contains("ade_noise_building"));

        let (_, refs) = exporter.build(rows[1].as_ref()).unwrap();
        assert_eq!(refs, FeatureRefs::default());
    }

    #[tokio::test]
    async fn test_empty_page_issues_no_query() {
        let source = MemorySource::new();
        let mut exporter = FeatureExporter::new(mapping(), &ExportConfig::default()).unwrap();
        assert!(exporter.fetch(&[], &source).await.unwrap().is_empty());
        assert_eq!(source.fetch_count(), 0);
    }
}
