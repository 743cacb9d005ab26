//! Run orchestration for the stop catalog pipeline.
//!
//! The [`runner`] walks one full reconciliation run — fetch, normalize,
//! diff against the stored previous snapshot, select lookup targets — and
//! hands the targets to the [`scheduler`], which drives the external name
//! lookups under a bounded worker pool with periodic checkpoints. The
//! runner then merges whatever the scheduler produced back into the
//! current snapshot and persists the final table.
//!
//! Both halves talk to their collaborators through traits
//! ([`stopsync_catalog::CatalogSource`], [`stopsync_catalog::NameLookup`],
//! [`stopsync_store::SnapshotStore`]), so the whole pipeline runs against
//! in-memory doubles in tests.

pub mod runner;
pub mod scheduler;

pub use runner::{Pipeline, PipelineConfig, PipelineError, RunReport, RunSummary};
pub use scheduler::{EnrichmentOutcome, EnrichmentScheduler, SchedulerConfig};

// ============================================================================
// Test Doubles
// ============================================================================
