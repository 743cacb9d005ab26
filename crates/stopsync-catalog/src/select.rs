//! Enrichment target selection.

use serde::{Deserialize, Serialize};

use crate::diff::ChangeReport;

/// Why a code needs an external lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrichmentReason {
    New,
    NameChanged,
}

/// One code scheduled for external name enrichment. Created at selection
/// time, consumed by the scheduler, replaced by an
/// [`EnrichmentResult`](crate::merge::EnrichmentResult).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub code: String,
    pub reason: EnrichmentReason,
}

/// Derives the minimal lookup work list from a change report.
///
/// Every new code (ascending), then every name-changed code (ascending);
/// removed and unchanged codes are never selected — removed stops no longer
/// exist to look up. A `limit` truncates the ordered list, which keeps test
/// runs reproducible. A report with zero changes yields an empty list and
/// the caller must skip the scheduler entirely.
pub fn select_targets(report: &ChangeReport, limit: Option<usize>) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = report
        .new
        .iter()
        .map(|entry| WorkItem {
            code: entry.code.clone(),
            reason: EnrichmentReason::New,
        })
        .chain(report.name_changed.iter().map(|change| WorkItem {
            code: change.code.clone(),
            reason: EnrichmentReason::NameChanged,
        }))
        .collect();

    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}
