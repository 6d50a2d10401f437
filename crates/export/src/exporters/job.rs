use super::appearance::AppearanceExporter;
use super::attribute::AttributeExporter;
use super::feature::{FeatureExporter, FeatureMapping};
use super::geometry::{GeometryExporter, GeometryMaterializer};
use super::implicit::ImplicitGeometryExporter;
use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::config::{AppearanceMode, ExportConfig};
use crate::context::{ExportContext, JobSummary};
use crate::dedup::FilterContext;
use crate::error::{ExportError, ExportResult};
use crate::extension::{ExtensionDelegate, ExtensionRequest, NoExtensions, PropertyFilter};
use crate::identity::{IdentityKey, IdentityKind};
use crate::loading::{BatchCoordinator, BatchFlush};
use crate::model::{
    unshare, Appearance, Feature, FeatureGeometry, GeometryProperty, ImplicitGeometryProperty, SharedFeature,
};
use crate::reporting::ExportIssue;
use std::collections::HashSet;
use std::sync::Arc;
use strata_core::AppConfigTrait;

const NAME: &str = "feature";

/// Result of a finished job
#[derive(Debug)]
pub struct JobOutput {
    /// Appearances exported once for the whole job, in global mode
    pub appearances: Vec<Arc<Appearance>>,
    pub summary: JobSummary,
}

/// One export job over one data source.
///
/// Features are exported page by page. Each page resolves the features' own
/// rows and low-cardinality properties immediately, defers geometry into the
/// batched geometry exporter and flushes it once the whole page is queued.
pub struct ExportJob<'a> {
    source: &'a dyn DataSource,
    context: ExportContext,
    features: FeatureExporter,
    geometry: GeometryExporter,
    implicit: ImplicitGeometryExporter,
    appearances: AppearanceExporter,
    attributes: AttributeExporter,
    coordinator: BatchCoordinator,
    filter: PropertyFilter,
    delegate: Box<dyn ExtensionDelegate<Feature>>,
}

impl<'a> ExportJob<'a> {
    /// Validate the configuration and prepare every sub-exporter
    pub fn new(source: &'a dyn DataSource, config: ExportConfig, mapping: FeatureMapping) -> ExportResult<Self> {
        config.validate()?;
        if source.dialect() != *config.get_dialect() {
            return Err(ExportError::Configuration(format!(
                "Data source speaks {}, but the job is configured for {}",
                source.dialect(),
                *config.get_dialect()
            )));
        }

        tracing::info!(
            "Starting {} export: batch size {}, {:?} appearances, {} error policy",
            mapping.feature_type(),
            *config.get_batch_size(),
            *config.get_appearance_mode(),
            *config.get_error_policy()
        );

        Ok(Self {
            source,
            features: FeatureExporter::new(mapping, &config)?,
            geometry: GeometryExporter::new(GeometryMaterializer::new(), &config)?,
            implicit: ImplicitGeometryExporter::new(&config)?,
            appearances: AppearanceExporter::new(&config)?,
            attributes: AttributeExporter::new(&config)?,
            coordinator: BatchCoordinator::new(*config.get_max_flush_rounds()),
            filter: PropertyFilter::all(),
            delegate: Box::new(NoExtensions),
            context: ExportContext::new(config),
        })
    }

    pub fn with_delegate(mut self, delegate: impl ExtensionDelegate<Feature> + 'static) -> Self {
        self.delegate = Box::new(delegate);
        self
    }

    /// Skip the named properties (`attributes`, `appearance`, `implicit`, `geometry`)
    pub fn with_property_filter(mut self, filter: PropertyFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_themes<I, S>(mut self, themes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.appearances.set_themes(FilterContext::new(themes));
        self
    }

    pub fn context(&self) -> &ExportContext {
        &self.context
    }

    /// Export one page of features
    pub async fn export_page(&mut self, ids: &[i64]) -> ExportResult<Vec<Feature>> {
        let rows = self.features.fetch(ids, self.source).await?;

        let mut returned = HashSet::with_capacity(rows.len());
        let mut shared = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.get("id")?;
            returned.insert(id);

            match self.export_feature(id, row.as_ref()).await {
                Ok(Some(feature)) => shared.push(feature),
                Ok(None) => {}
                Err(err) if err.is_fatal() => {
                    self.abort();
                    return Err(err);
                }
                Err(err) => {
                    if let Err(escalated) = self.context.reporter.report(ExportIssue::row_failure(NAME, id, &err)) {
                        self.abort();
                        return Err(escalated);
                    }
                }
            }
        }

        for id in ids.iter().filter(|id| !returned.contains(*id)) {
            self.context.reporter.report(ExportIssue::dangling(NAME, *id))?;
        }

        let mut batched: [&mut dyn BatchFlush; 1] = [&mut self.geometry];
        let flushed = match self
            .coordinator
            .flush_all(&mut batched, self.source, &mut self.context)
            .await
        {
            Ok(flushed) => flushed,
            Err(err) => {
                self.abort();
                return Err(err);
            }
        };

        self.register_appearance_targets().await?;

        self.context.end_page(shared.len());
        tracing::debug!(
            "Page of {} ids exported: {} features, {} flush rounds, {} bulk queries",
            ids.len(),
            shared.len(),
            flushed.rounds,
            flushed.queries()
        );
        Ok(shared.into_iter().map(unshare).collect())
    }

    async fn export_feature(&mut self, id: i64, row: &dyn DatabaseRow) -> ExportResult<Option<SharedFeature>> {
        let (mut feature, refs) = self.features.build(row)?;

        let key = match &feature.gml_id {
            Some(gml_id) => IdentityKey::external(gml_id.clone()),
            None => IdentityKey::row(NAME, id),
        };
        if self.context.identity.lookup_or_register(key, Some(id), IdentityKind::Feature) {
            tracing::debug!("Feature #{} was already exported in this job", id);
            return Ok(None);
        }

        if self.filter.allows("attributes") {
            feature.attributes = self
                .attributes
                .export_for_feature(id, self.source, &mut self.context)
                .await?;
        }

        let mode = *self.context.config().get_appearance_mode();
        if self.filter.allows("appearance") && mode == AppearanceMode::Local {
            feature.appearances = self
                .appearances
                .export_for_feature(id, self.source, &mut self.context)
                .await?;
        }

        if self.filter.allows("implicit") {
            for implicit in refs.implicits {
                let value = self
                    .implicit
                    .export(implicit.id, self.source, &mut self.context, &mut self.geometry)
                    .await?;
                if let Some(value) = value {
                    feature.implicit_geometries.push(ImplicitGeometryProperty {
                        name: implicit.property,
                        transformation: implicit.transformation,
                        reference_point: implicit.reference_point,
                        value,
                    });
                }
            }
        }

        if !refs.extensions.is_empty() {
            let request = ExtensionRequest {
                tables: &refs.extensions,
                owner_id: id,
                owner_type: self.features.mapping().feature_type(),
                filter: &self.filter,
                source: self.source,
            };
            self.delegate.delegate(request, &mut feature).await?;
        }

        let shared = feature.into_shared();
        if self.filter.allows("geometry") {
            for (name, geometry_id) in refs.geometries {
                let target = Arc::clone(&shared);
                self.geometry.add_batch(geometry_id, move |resolved| {
                    target.lock().geometries.push(FeatureGeometry {
                        name,
                        value: GeometryProperty::from_resolved(resolved),
                    });
                });
            }
        }

        Ok(Some(shared))
    }

    /// Hand the surfaces materialized by the last flush to the side table
    async fn register_appearance_targets(&mut self) -> ExportResult<()> {
        let surfaces = self.geometry.materializer_mut().drain_surface_ids();
        let mode = *self.context.config().get_appearance_mode();
        if mode != AppearanceMode::Global || !self.filter.allows("appearance") {
            return Ok(());
        }

        if let Some(side_table) = self.context.appearances.side_table() {
            for id in surfaces {
                side_table.register(id);
            }
            side_table.flush(self.source).await?;
        }
        Ok(())
    }

    /// Drop every pending request without invoking setters, along with the
    /// surfaces a failed flush materialized for features never returned
    pub fn abort(&mut self) -> usize {
        let stale = self.geometry.materializer_mut().drain_surface_ids();
        if !stale.is_empty() {
            tracing::debug!("Discarding {} surfaces of an unfinished page", stale.len());
        }

        let mut batched: [&mut dyn BatchFlush; 1] = [&mut self.geometry];
        let dropped = self.coordinator.abort(&mut batched);
        if dropped > 0 {
            tracing::warn!("Export aborted with {} pending requests", dropped);
        }
        dropped
    }

    /// Export global appearances, release the side table and close the job
    pub async fn finish(mut self) -> ExportResult<JobOutput> {
        self.abort();

        let appearances = if *self.context.config().get_appearance_mode() == AppearanceMode::Global
            && self.filter.allows("appearance")
        {
            self.appearances.export_global(self.source, &mut self.context).await?
        } else {
            Vec::new()
        };

        if let Some(side_table) = self.context.appearances.side_table() {
            side_table.drop_table(self.source).await?;
        }

        Ok(JobOutput {
            appearances,
            summary: self.context.end_job(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfigBuilder;
    use crate::backends::{MemorySource, SqlDialect};

    fn mapping() -> FeatureMapping {
        FeatureMapping::new("Building", "building", "b").geometry("lod1Solid", "lod1_solid_id")
    }

    #[test]
    fn test_dialect_mismatch_is_rejected() {
        let source = MemorySource::with_dialect(SqlDialect::SQLite);
        let result = ExportJob::new(&source, ExportConfig::default(), mapping());
        assert!(matches!(result, Err(ExportError::Configuration(ref msg)) if msg.contains("sqlite")));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let source = MemorySource::new();
        let config = ExportConfigBuilder::new()
            .batch_size(0)
            .build()
            .expect("Failed to build config");
        assert!(matches!(
            ExportJob::new(&source, config, mapping()),
            Err(ExportError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_page() {
        let source = MemorySource::new();
        let mut job = ExportJob::new(&source, ExportConfig::default(), mapping()).unwrap();
        assert!(job.export_page(&[]).await.unwrap().is_empty());
        assert_eq!(job.context().pages(), 1);
        assert!(source.statements().is_empty());
    }
}
