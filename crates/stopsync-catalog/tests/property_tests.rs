//! Property-Based Tests for the catalog core
//!
//! Uses proptest to pin the invariants that hold for every snapshot pair:
//! 1. The diff partitions both code sets exactly, with no overlap
//! 2. Diffing a snapshot against itself reports nothing but unchanged codes
//! 3. The selector never schedules removed codes and respects its limit
//! 4. The merge is order-independent in its results input

use std::collections::HashSet;

use approx::relative_eq;
use chrono::NaiveDate;
use proptest::prelude::*;
use stopsync_catalog::{
    diff, merge, select_targets, EnrichmentResult, RawStopRecord, Snapshot,
};

// ============================================================================
// Strategies
// ============================================================================

/// Raw codes drawn from a small range so snapshot pairs overlap often.
fn raw_code_strategy() -> impl Strategy<Value = String> {
    (0u32..60).prop_map(|n| n.to_string())
}

/// Names drawn from a small pool so renames and matches both occur.
fn name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Interchange".to_string()),
        Just("Opp Blk 12".to_string()),
        Just("Stn Exit B".to_string()),
        Just("Terminal".to_string()),
    ]
}

fn record_strategy() -> impl Strategy<Value = RawStopRecord> {
    (raw_code_strategy(), name_strategy(), -90.0f64..90.0, -180.0f64..180.0).prop_map(
        |(code, name, lat, lon)| RawStopRecord {
            code,
            name,
            street: "Road".to_string(),
            lat,
            lon,
        },
    )
}

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(record_strategy(), 0..40).prop_map(|raw| {
        let (snapshot, _) = Snapshot::from_raw(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), raw);
        snapshot
    })
}

fn result_strategy() -> impl Strategy<Value = EnrichmentResult> {
    (raw_code_strategy(), any::<bool>(), name_strategy()).prop_map(|(code, success, name)| {
        let code = format!("{:05}", code.parse::<u64>().unwrap());
        if success {
            EnrichmentResult::success(code, Some(name))
        } else {
            EnrichmentResult::failure(code, Some("lookup failed".to_string()))
        }
    })
}

// ============================================================================
// Diff Partition Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn diff_partitions_are_disjoint_and_cover_both_sides(
        previous in snapshot_strategy(),
        current in snapshot_strategy(),
    ) {
        let report = diff(&previous, &current);

        let new: HashSet<&str> = report.new.iter().map(|e| e.code.as_str()).collect();
        let removed: HashSet<&str> = report.removed.iter().map(|e| e.code.as_str()).collect();
        let unchanged: HashSet<&str> = report.unchanged.iter().map(String::as_str).collect();
        let renamed: HashSet<&str> = report.name_changed.iter().map(|c| c.code.as_str()).collect();

        prop_assert!(new.is_disjoint(&removed));
        prop_assert!(new.is_disjoint(&renamed));
        prop_assert!(new.is_disjoint(&unchanged));
        prop_assert!(removed.is_disjoint(&renamed));
        prop_assert!(removed.is_disjoint(&unchanged));
        prop_assert!(unchanged.is_disjoint(&renamed));

        let current_codes: HashSet<&str> =
            current.records().iter().map(|r| r.code.as_str()).collect();
        let previous_codes: HashSet<&str> =
            previous.records().iter().map(|r| r.code.as_str()).collect();

        // new only from current, removed only from previous, the rest from both.
        prop_assert!(new.is_subset(&current_codes));
        prop_assert!(new.is_disjoint(&previous_codes));
        prop_assert!(removed.is_subset(&previous_codes));
        prop_assert!(removed.is_disjoint(&current_codes));
        for code in unchanged.iter().chain(renamed.iter()) {
            prop_assert!(current_codes.contains(code) && previous_codes.contains(code));
        }

        // The union covers both sides exactly.
        let mut covered: HashSet<&str> = HashSet::new();
        covered.extend(&new);
        covered.extend(&removed);
        covered.extend(&unchanged);
        covered.extend(&renamed);
        let mut union: HashSet<&str> = current_codes.clone();
        union.extend(&previous_codes);
        prop_assert_eq!(covered, union);

        prop_assert_eq!(report.total_current(), current.len());
        prop_assert_eq!(report.total_previous(), previous.len());
    }

    #[test]
    fn self_diff_is_all_unchanged(snapshot in snapshot_strategy()) {
        let report = diff(&snapshot, &snapshot);
        prop_assert!(report.new.is_empty());
        prop_assert!(report.removed.is_empty());
        prop_assert!(report.name_changed.is_empty());
        prop_assert_eq!(report.unchanged.len(), snapshot.len());
    }
}

// ============================================================================
// Selector Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn selector_respects_limit_and_excludes_removed(
        previous in snapshot_strategy(),
        current in snapshot_strategy(),
        limit in prop::option::of(0usize..50),
    ) {
        let report = diff(&previous, &current);
        let items = select_targets(&report, limit);

        let candidates = report.new.len() + report.name_changed.len();
        let expected = match limit {
            Some(limit) => limit.min(candidates),
            None => candidates,
        };
        prop_assert_eq!(items.len(), expected);

        let removed: HashSet<&str> = report.removed.iter().map(|e| e.code.as_str()).collect();
        let unchanged: HashSet<&str> = report.unchanged.iter().map(String::as_str).collect();
        for item in &items {
            prop_assert!(!removed.contains(item.code.as_str()));
            prop_assert!(!unchanged.contains(item.code.as_str()));
        }

        // Dispatching each selected code at most once relies on uniqueness.
        let distinct: HashSet<&str> = items.iter().map(|i| i.code.as_str()).collect();
        prop_assert_eq!(distinct.len(), items.len());
    }
}

// ============================================================================
// Merge Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn merge_is_order_independent(
        current in snapshot_strategy(),
        results in prop::collection::vec(result_strategy(), 0..20),
    ) {
        // Distinct codes per result set: reordering duplicates legitimately
        // changes which one wins, so dedupe first.
        let mut seen = HashSet::new();
        let results: Vec<EnrichmentResult> = results
            .into_iter()
            .filter(|r| seen.insert(r.code.clone()))
            .collect();

        let forward = merge(&current, &results);
        let mut reversed = results.clone();
        reversed.reverse();
        let backward = merge(&current, &reversed);

        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn merge_preserves_base_fields_and_order(
        current in snapshot_strategy(),
        results in prop::collection::vec(result_strategy(), 0..20),
    ) {
        let merged = merge(&current, &results);
        prop_assert_eq!(merged.len(), current.len());

        for (record, stop) in merged.iter().zip(current.records()) {
            prop_assert_eq!(&record.code, &stop.code);
            prop_assert_eq!(&record.name, &stop.name);
            prop_assert_eq!(&record.street, &stop.street);
            prop_assert!(relative_eq!(record.lat, stop.lat));
            prop_assert!(relative_eq!(record.lon, stop.lon));
            prop_assert!(!record.corrected_name.trim().is_empty() || stop.name.is_empty());
        }
    }
}
