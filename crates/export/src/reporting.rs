//! Non-fatal row issues and the job's error policy
//!
//! Rows of an unsupported type, rows that fail to materialize and dangling
//! batched references do not end a job by themselves. They are reported here;
//! the configured [`ErrorPolicy`] decides whether a report is logged and the
//! job continues, or the report is escalated into [`ExportError::Aborted`].

use crate::error::{ExportError, ExportResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What to do with a reported row issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    LogAndContinue,
    Abort,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "log_and_continue" | "log" | "continue" => Ok(ErrorPolicy::LogAndContinue),
            "abort" | "fail" => Ok(ErrorPolicy::Abort),
            _ => Err(format!("Unknown error policy: {}", s)),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::LogAndContinue => write!(f, "log_and_continue"),
            ErrorPolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Category of a reported issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// Row type id outside the supported set; the row was skipped
    UnsupportedType,
    /// A row group could not be materialized
    RowFailure,
    /// A batched id had no matching row
    DanglingReference,
}

impl IssueKind {
    /// Dangling references are always logged, never escalated
    pub fn escalates(&self) -> bool {
        !matches!(self, IssueKind::DanglingReference)
    }
}

/// One reported issue
#[derive(Debug, Clone, PartialEq)]
pub struct ExportIssue {
    pub kind: IssueKind,
    pub exporter: &'static str,
    pub id: Option<i64>,
    pub message: String,
}

impl ExportIssue {
    pub fn unsupported_type(exporter: &'static str, id: i64, type_id: impl fmt::Display) -> Self {
        Self {
            kind: IssueKind::UnsupportedType,
            exporter,
            id: Some(id),
            message: format!("unsupported type id {}", type_id),
        }
    }

    pub fn row_failure(exporter: &'static str, id: i64, error: &ExportError) -> Self {
        Self {
            kind: IssueKind::RowFailure,
            exporter,
            id: Some(id),
            message: error.to_string(),
        }
    }

    pub fn dangling(exporter: &'static str, id: i64) -> Self {
        Self {
            kind: IssueKind::DanglingReference,
            exporter,
            id: Some(id),
            message: "no matching row".to_string(),
        }
    }
}

impl fmt::Display for ExportIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} #{}: {}", self.exporter, id, self.message),
            None => write!(f, "{}: {}", self.exporter, self.message),
        }
    }
}

/// Counts of reported issues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueSummary {
    pub unsupported_types: usize,
    pub row_failures: usize,
    pub dangling_references: usize,
}

impl IssueSummary {
    pub fn total(&self) -> usize {
        self.unsupported_types + self.row_failures + self.dangling_references
    }
}

/// Job-scoped collaborator that receives row issues
#[derive(Debug)]
pub struct ErrorReporter {
    policy: ErrorPolicy,
    counts: HashMap<IssueKind, usize>,
}

impl ErrorReporter {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            counts: HashMap::new(),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Record an issue, escalating it when the policy says so
    pub fn report(&mut self, issue: ExportIssue) -> ExportResult<()> {
        *self.counts.entry(issue.kind).or_insert(0) += 1;

        if self.policy == ErrorPolicy::Abort && issue.kind.escalates() {
            tracing::error!("Aborting export: {}", issue);
            return Err(ExportError::Aborted(issue.to_string()));
        }

        match issue.kind {
            IssueKind::DanglingReference => tracing::warn!("Dangling reference: {}", issue),
            IssueKind::UnsupportedType => tracing::warn!("Skipping row: {}", issue),
            IssueKind::RowFailure => tracing::warn!("Failed to export row: {}", issue),
        }
        Ok(())
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> IssueSummary {
        IssueSummary {
            unsupported_types: self.count(IssueKind::UnsupportedType),
            row_failures: self.count(IssueKind::RowFailure),
            dangling_references: self.count(IssueKind::DanglingReference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_continue_counts() {
        let mut reporter = ErrorReporter::new(ErrorPolicy::LogAndContinue);
        reporter.report(ExportIssue::unsupported_type("geometry", 4, 99)).unwrap();
        reporter.report(ExportIssue::dangling("geometry", 5)).unwrap();
        reporter.report(ExportIssue::dangling("appearance", 6)).unwrap();

        let summary = reporter.summary();
        assert_eq!(summary.unsupported_types, 1);
        assert_eq!(summary.dangling_references, 2);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_abort_escalates_row_issues() {
        let mut reporter = ErrorReporter::new(ErrorPolicy::Abort);
        let err = reporter
            .report(ExportIssue::unsupported_type("geometry", 4, 99))
            .unwrap_err();
        assert!(matches!(err, ExportError::Aborted(ref msg) if msg == "geometry #4: unsupported type id 99"));
        assert_eq!(reporter.count(IssueKind::UnsupportedType), 1);
    }

    #[test]
    fn test_dangling_never_escalates() {
        let mut reporter = ErrorReporter::new(ErrorPolicy::Abort);
        assert!(reporter.report(ExportIssue::dangling("geometry", 5)).is_ok());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("abort".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Abort);
        assert_eq!("log-and-continue".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::LogAndContinue);
        assert!("retry".parse::<ErrorPolicy>().is_err());
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::LogAndContinue);
    }
}
