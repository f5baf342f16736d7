//! Per-item identity and terminal outcomes.

use crate::merge::{MergedRecord, MetadataField};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::fmt;

/// One row needing enrichment: a stable row index, the user-supplied query
/// title, and a snapshot of the row's existing values used by the merger's
/// gap-fill rule. Immutable once created.
#[derive(Debug, Clone)]
pub struct QueryItem {
    row_index: u64,
    title: String,
    existing: BTreeMap<MetadataField, String>,
}

impl QueryItem {
    pub fn new(
        row_index: u64,
        title: impl Into<String>,
        existing: BTreeMap<MetadataField, String>,
    ) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            bail!("query title for row {row_index} cannot be empty");
        }
        Ok(Self {
            row_index,
            title,
            existing,
        })
    }

    pub fn row_index(&self) -> u64 {
        self.row_index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn existing(&self) -> &BTreeMap<MetadataField, String> {
        &self.existing
    }
}

/// Why an item reached the `Failed` terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every configured provider failed (after retry exhaustion) for this item.
    AllProvidersFailed,
    /// The run was cancelled before or while this item was in flight.
    Cancelled,
    /// The item's task died unexpectedly; merge semantics make this
    /// unreachable in practice, but it is recorded rather than dropped.
    Internal,
}

impl FailureKind {
    /// Stable label used as the error-kind key in run statistics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AllProvidersFailed => "all_providers_failed",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one item's pipeline run. Created once, immutable, and
/// consumed by the aggregator.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// At least one provider candidate cleared the threshold; the merged
    /// record holds every gap the providers could fill.
    Matched(MergedRecord),
    /// All providers answered but no candidate cleared the acceptance
    /// threshold. Not an error.
    NoMatch,
    Failed { kind: FailureKind, message: String },
}

impl FetchOutcome {
    pub fn cancelled() -> Self {
        FetchOutcome::Failed {
            kind: FailureKind::Cancelled,
            message: "run cancelled before the item completed".to_string(),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, FetchOutcome::Matched(_))
    }
}
