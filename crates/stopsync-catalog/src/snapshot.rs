//! Code normalization and snapshot construction.
//!
//! A snapshot is an ordered-by-code, deduplicated-by-code capture of the
//! catalog at one date. All comparison downstream runs on normalized codes,
//! so normalization is the single validation boundary: malformed rows are
//! dropped here with a warning and never reach the diff engine.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::record::{BusStop, RawStopRecord};

/// Fixed width of a normalized code.
pub const CODE_WIDTH: usize = 5;

/// A code that cannot be interpreted as a non-negative number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed bus stop code {0:?}")]
pub struct MalformedCode(pub String);

/// Canonicalizes a raw code into the fixed-width form used for identity.
///
/// Accepts integer-like and float-like text (`"1012"`, `"1012.0"` →
/// `"01012"`, fraction truncated toward zero). The empty string and the
/// spelled-out null markers that leak out of loosely typed table loads
/// (`nan`, `none`, `null`, any ASCII case) are malformed, as are
/// non-numeric, non-finite, and negative values. Codes wider than
/// [`CODE_WIDTH`] pass through unpadded.
pub fn normalize_code(raw: &str) -> Result<String, MalformedCode> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return Err(MalformedCode(raw.to_string()));
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| MalformedCode(raw.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(MalformedCode(raw.to_string()));
    }

    Ok(format!("{:0width$}", value.trunc() as u64, width = CODE_WIDTH))
}

/// What the normalization pass did to a batch of raw records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeSummary {
    /// Rows seen in the input.
    pub total_raw: usize,
    /// Rows that made it into the snapshot.
    pub accepted: usize,
    /// Rows dropped because the code would not normalize.
    pub malformed: usize,
    /// Rows displaced by a later occurrence of the same code.
    pub duplicates: usize,
}

/// A full catalog capture at one date.
///
/// Invariants: records are sorted ascending by code and codes are unique.
/// Both are established at construction; the record list is therefore not
/// publicly mutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub captured_on: NaiveDate,
    records: Vec<BusStop>,
}

impl Snapshot {
    /// A snapshot with no records, used as the previous side on a first run.
    pub fn empty(captured_on: NaiveDate) -> Self {
        Self {
            captured_on,
            records: Vec::new(),
        }
    }

    /// Normalizes raw records into a snapshot.
    ///
    /// Rows with malformed codes are dropped with a warning. When the same
    /// normalized code occurs more than once, the last occurrence in input
    /// order wins; each displacement is warned about and counted, never
    /// silent.
    pub fn from_raw<I>(captured_on: NaiveDate, raw: I) -> (Self, NormalizeSummary)
    where
        I: IntoIterator<Item = RawStopRecord>,
    {
        let mut by_code: BTreeMap<String, BusStop> = BTreeMap::new();
        let mut summary = NormalizeSummary::default();

        for record in raw {
            summary.total_raw += 1;
            let code = match normalize_code(&record.code) {
                Ok(code) => code,
                Err(err) => {
                    summary.malformed += 1;
                    warn!(code = %record.code, error = %err, "dropping record with malformed code");
                    continue;
                }
            };

            let stop = BusStop {
                code: code.clone(),
                name: record.name.trim().to_string(),
                street: record.street.trim().to_string(),
                lat: record.lat,
                lon: record.lon,
            };

            if by_code.insert(code.clone(), stop).is_some() {
                summary.duplicates += 1;
                warn!(code = %code, "duplicate code in source; keeping the last occurrence");
            }
        }

        summary.accepted = by_code.len();
        let snapshot = Self {
            captured_on,
            records: by_code.into_values().collect(),
        };
        (snapshot, summary)
    }

    /// Records in ascending code order.
    pub fn records(&self) -> &[BusStop] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record for `code`, if present.
    pub fn get(&self, code: &str) -> Option<&BusStop> {
        self.records
            .binary_search_by(|record| record.code.as_str().cmp(code))
            .ok()
            .map(|index| &self.records[index])
    }
}
