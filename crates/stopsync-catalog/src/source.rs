//! Catalog source contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::RawStopRecord;

/// Failure of the upstream catalog fetch. Always fatal to a run: the
/// pipeline never persists a partial snapshot.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("catalog source unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("catalog source returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Supplies the current full catalog, typically a paginated remote fetch.
///
/// Retry policy is the implementation's concern; by the time an error
/// surfaces here it is final.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_current(&self) -> Result<Vec<RawStopRecord>, SourceError>;
}
