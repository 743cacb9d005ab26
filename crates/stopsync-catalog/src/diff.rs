//! Change detection between two normalized snapshots.
//!
//! The report partitions the union of both code sets exactly: a code is new
//! (current only), removed (previous only), unchanged (both, same name), or
//! name-changed (both, different name). Name comparison is exact and
//! case-sensitive on the trimmed names the normalizer produced — no fuzzy
//! matching; formatting noise flagging a change is an accepted tradeoff of
//! the selective-rescrape cost model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::BusStop;
use crate::snapshot::Snapshot;

/// A code paired with the display name it carried in the snapshot that
/// contributed it: the current name for `new` entries, the previous name
/// for `removed` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeName {
    pub code: String,
    pub name: String,
}

/// A code present in both snapshots whose name differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChange {
    pub code: String,
    pub old_name: String,
    pub new_name: String,
}

/// Structured diff between two snapshots. Entries within each group are in
/// ascending code order. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub new: Vec<CodeName>,
    pub removed: Vec<CodeName>,
    pub unchanged: Vec<String>,
    pub name_changed: Vec<NameChange>,
}

impl ChangeReport {
    /// Codes in the current snapshot: new + unchanged + name-changed.
    pub fn total_current(&self) -> usize {
        self.new.len() + self.unchanged.len() + self.name_changed.len()
    }

    /// Codes in the previous snapshot: removed + unchanged + name-changed.
    pub fn total_previous(&self) -> usize {
        self.removed.len() + self.unchanged.len() + self.name_changed.len()
    }

    /// Net change in catalog size.
    pub fn net_delta(&self) -> i64 {
        self.total_current() as i64 - self.total_previous() as i64
    }

    /// Total change count: |new| + |removed| + |name_changed|.
    pub fn total_changes(&self) -> usize {
        self.new.len() + self.removed.len() + self.name_changed.len()
    }

    /// True when the two snapshots are identical under code+name comparison.
    pub fn is_unchanged(&self) -> bool {
        self.total_changes() == 0
    }
}

/// Computes the change report between `previous` and `current`.
///
/// An empty `previous` (the first-run case) puts every current code in
/// `new` and leaves `removed` empty.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> ChangeReport {
    let old_by_code: BTreeMap<&str, &BusStop> = previous
        .records()
        .iter()
        .map(|record| (record.code.as_str(), record))
        .collect();
    let new_by_code: BTreeMap<&str, &BusStop> = current
        .records()
        .iter()
        .map(|record| (record.code.as_str(), record))
        .collect();

    let mut report = ChangeReport::default();

    for (code, stop) in &new_by_code {
        match old_by_code.get(code) {
            None => report.new.push(CodeName {
                code: (*code).to_string(),
                name: stop.name.clone(),
            }),
            Some(old) if old.name == stop.name => report.unchanged.push((*code).to_string()),
            Some(old) => report.name_changed.push(NameChange {
                code: (*code).to_string(),
                old_name: old.name.clone(),
                new_name: stop.name.clone(),
            }),
        }
    }

    for (code, stop) in &old_by_code {
        if !new_by_code.contains_key(code) {
            report.removed.push(CodeName {
                code: (*code).to_string(),
                name: stop.name.clone(),
            });
        }
    }

    report
}
