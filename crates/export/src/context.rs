//! Job-scoped export state
//!
//! Everything that must live exactly as long as one export job is owned by an
//! [`ExportContext`] and handed to sub-exporters as `&mut` on each call.
//! Nothing here is process-wide; parallel jobs each own a context.

use crate::config::ExportConfig;
use crate::dedup::{DedupCache, SideTable};
use crate::identity::IdentityCache;
use crate::model::Appearance;
use crate::reporting::{ErrorReporter, IssueSummary};

/// Totals reported when a job ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub pages: usize,
    pub features: usize,
    pub identities: usize,
    pub global_appearances: usize,
    pub issues: IssueSummary,
}

/// State shared by the sub-exporters of one job
#[derive(Debug)]
pub struct ExportContext {
    config: ExportConfig,
    pub identity: IdentityCache,
    /// Global appearance cache; its side table collects targeted surfaces
    pub appearances: DedupCache<Appearance>,
    pub reporter: ErrorReporter,
    pages: usize,
    features: usize,
}

impl ExportContext {
    pub fn new(config: ExportConfig) -> Self {
        let side_table = SideTable::new(
            config.get_side_table_name(),
            *config.get_dialect(),
            *config.get_batch_size(),
        );
        Self {
            identity: IdentityCache::new(),
            appearances: DedupCache::global(side_table),
            reporter: ErrorReporter::new(*config.get_error_policy()),
            config,
            pages: 0,
            features: 0,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Page checkpoint
    pub fn end_page(&mut self, features: usize) {
        self.pages += 1;
        self.features += features;
        tracing::debug!(
            "Page {} done: {} features, {} identities registered",
            self.pages,
            features,
            self.identity.len()
        );
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Job checkpoint: summarize, then clear every job-scoped cache
    pub fn end_job(&mut self) -> JobSummary {
        let summary = JobSummary {
            pages: self.pages,
            features: self.features,
            identities: self.identity.len(),
            global_appearances: self.appearances.len(),
            issues: self.reporter.summary(),
        };

        self.identity.clear();
        self.appearances.clear();
        self.pages = 0;
        self.features = 0;

        tracing::info!(
            "Export job finished: {} features in {} pages, {} issues",
            summary.features,
            summary.pages,
            summary.issues.total()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::CacheKey;
    use crate::identity::{IdentityKey, IdentityKind};
    use crate::reporting::ExportIssue;

    #[test]
    fn test_end_job_clears_caches() {
        let mut ctx = ExportContext::new(ExportConfig::default());
        ctx.identity
            .lookup_or_register(IdentityKey::external("geom-1"), Some(1), IdentityKind::Geometry);
        ctx.appearances.store(
            CacheKey::new(3),
            Appearance {
                id: 3,
                gml_id: None,
                theme: Some("summer".into()),
                surface_data: Vec::new(),
            },
        );
        ctx.reporter.report(ExportIssue::dangling("geometry", 9)).unwrap();
        ctx.end_page(2);
        ctx.end_page(1);

        let summary = ctx.end_job();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.features, 3);
        assert_eq!(summary.identities, 1);
        assert_eq!(summary.global_appearances, 1);
        assert_eq!(summary.issues.dangling_references, 1);

        assert!(ctx.identity.is_empty());
        assert!(ctx.appearances.is_empty());
        assert_eq!(ctx.pages(), 0);
    }
}
