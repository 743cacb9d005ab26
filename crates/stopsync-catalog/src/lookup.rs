//! Per-code name lookup contract.

use async_trait::async_trait;
use thiserror::Error;

/// Name fields recovered by one lookup. Fields are trimmed and, when
/// present, non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupRecord {
    pub road_name: Option<String>,
    pub description: Option<String>,
}

impl LookupRecord {
    /// A lookup counts as successful when it recovered either field; the
    /// description is the candidate corrected name.
    pub fn is_success(&self) -> bool {
        self.road_name.is_some() || self.description.is_some()
    }
}

/// Transport-level lookup failure. An empty-but-well-formed result page is
/// not an error; it comes back as an empty [`LookupRecord`].
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Request(String),
    #[error("lookup request failed with status {0}")]
    Status(u16),
    #[error("lookup response too large ({0} bytes)")]
    OversizedResponse(usize),
}

/// The per-code scraping collaborator. One call per code; the scheduler
/// bounds each call with its own timeout and maps the outcome into an
/// [`EnrichmentResult`](crate::merge::EnrichmentResult).
#[async_trait]
pub trait NameLookup: Send + Sync {
    async fn fetch(&self, code: &str) -> Result<LookupRecord, LookupError>;
}
