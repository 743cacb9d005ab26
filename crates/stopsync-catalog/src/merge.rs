//! Merge of enrichment results into the current snapshot, with provenance.
//!
//! The lookup source is a name-only authority: coordinates and street always
//! come from the current snapshot. Every final record carries the origin of
//! its corrected name, so downstream consumers can tell an externally
//! verified name from a passthrough.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// Origin of a final record's corrected name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameSource {
    /// The catalog's own name, untouched.
    Original,
    /// A name recovered by the external lookup.
    Enriched,
}

/// Outcome of one external lookup attempt for one code. Immutable once
/// produced; appended to the result collection the merge consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub code: String,
    pub success: bool,
    pub corrected_name: Option<String>,
    pub error: Option<String>,
}

impl EnrichmentResult {
    pub fn success(code: impl Into<String>, corrected_name: Option<String>) -> Self {
        Self {
            code: code.into(),
            success: true,
            corrected_name,
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, error: Option<String>) -> Self {
        Self {
            code: code.into(),
            success: false,
            corrected_name: None,
            error,
        }
    }

    /// The corrected name, if this result is allowed to override a catalog
    /// name: success with a non-empty, non-whitespace value.
    pub fn corrected(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.corrected_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// A current-snapshot record plus its corrected name and provenance tag.
/// Constructed only by [`merge`]; nothing downstream mutates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub code: String,
    pub name: String,
    pub street: String,
    pub lat: f64,
    pub lon: f64,
    pub corrected_name: String,
    pub name_source: NameSource,
}

/// Folds enrichment results into the current snapshot.
///
/// Results are indexed by code (last result wins if a code is duplicated;
/// at-most-once dispatch means that should not happen, but it must not
/// crash). A record whose code has a successful result with a usable name
/// becomes `Enriched`; everything else keeps the current name as
/// `corrected_name` with `Original` provenance — including records whose
/// lookup failed, which fall back to the current name, never the previous
/// one. Output preserves the snapshot's code order. Pure; no I/O.
pub fn merge(current: &Snapshot, results: &[EnrichmentResult]) -> Vec<FinalRecord> {
    let mut by_code: HashMap<&str, &EnrichmentResult> = HashMap::with_capacity(results.len());
    for result in results {
        by_code.insert(result.code.as_str(), result);
    }

    current
        .records()
        .iter()
        .map(|stop| {
            let corrected = by_code
                .get(stop.code.as_str())
                .and_then(|result| result.corrected());
            let (corrected_name, name_source) = match corrected {
                Some(name) => (name.to_string(), NameSource::Enriched),
                None => (stop.name.clone(), NameSource::Original),
            };
            FinalRecord {
                code: stop.code.clone(),
                name: stop.name.clone(),
                street: stop.street.clone(),
                lat: stop.lat,
                lon: stop.lon,
                corrected_name,
                name_source,
            }
        })
        .collect()
}
