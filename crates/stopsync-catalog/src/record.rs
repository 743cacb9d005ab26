//! Record shapes shared across the pipeline.

use serde::{Deserialize, Serialize};

/// One catalog entry as delivered by a source or read back from a stored
/// table, before code normalization. The code may carry whitespace, float
/// formatting (`"1012.0"`), or leaked null markers from loosely typed loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStopRecord {
    pub code: String,
    pub name: String,
    pub street: String,
    pub lat: f64,
    pub lon: f64,
}

/// A normalized bus stop record. The code is fixed-width (five digits,
/// zero-padded); name and street are trimmed. Identity is the code: two
/// records describe the same stop iff their codes match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusStop {
    pub code: String,
    pub name: String,
    pub street: String,
    pub lat: f64,
    pub lon: f64,
}
