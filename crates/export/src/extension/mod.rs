//! Extension hand-off
//!
//! Vendor tables joined into a projection are opaque to the engine. It only
//! probes whether their marker columns are non-null on a row and forwards the
//! owning object to an [`ExtensionDelegate`].

use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::error::ExportResult;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Properties excluded from an export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyFilter {
    excluded: BTreeSet<String>,
}

impl PropertyFilter {
    /// Filter that lets every property through
    pub fn all() -> Self {
        Self::default()
    }

    pub fn excluding<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: properties.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, property: &str) -> bool {
        !self.excluded.contains(property)
    }
}

/// Marker columns that reveal extension rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionProbe {
    probes: Vec<(String, String)>,
}

impl ExtensionProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `table` as present when `column` is non-null
    pub fn table(mut self, table: &str, column: &str) -> Self {
        self.probes.push((table.to_string(), column.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Tables whose marker column is non-null on the row
    pub fn detect(&self, row: &dyn DatabaseRow) -> BTreeSet<String> {
        self.probes
            .iter()
            .filter(|(_, column)| !row.is_null(column))
            .map(|(table, _)| table.clone())
            .collect()
    }
}

/// What a delegate is handed
pub struct ExtensionRequest<'a> {
    pub tables: &'a BTreeSet<String>,
    pub owner_id: i64,
    pub owner_type: &'a str,
    pub filter: &'a PropertyFilter,
    pub source: &'a dyn DataSource,
}

/// External handler for extension tables
#[async_trait]
pub trait ExtensionDelegate<O: Send>: Send + Sync {
    async fn delegate(&self, request: ExtensionRequest<'_>, owner: &mut O) -> ExportResult<()>;
}

/// Delegate for jobs without extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtensions;

#[async_trait]
impl<O: Send> ExtensionDelegate<O> for NoExtensions {
    async fn delegate(&self, request: ExtensionRequest<'_>, _owner: &mut O) -> ExportResult<()> {
        tracing::debug!(
            "Ignoring extension tables {:?} on {} #{}",
            request.tables,
            request.owner_type,
            request.owner_id
        );
        Ok(())
    }
}
