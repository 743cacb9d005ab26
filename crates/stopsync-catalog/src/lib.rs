//! Stopsync Catalog: snapshot reconciliation for a bus stop catalog
//!
//! This crate holds the pure core of the pipeline: the record model, code
//! normalization, change detection between two dated snapshots, selection of
//! the minimal enrichment workload, and the provenance-tagged merge of
//! enrichment results back into the current catalog.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    SNAPSHOT RECONCILIATION PIPELINE                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │   CatalogSource ──► Normalizer ──► current ─┐                        │
//! │                                             ▼                        │
//! │   SnapshotStore ──► previous ─────────► Diff Engine                  │
//! │                                             │                        │
//! │                                        ChangeReport                  │
//! │                                             │                        │
//! │                                     Target Selector                  │
//! │                                             │                        │
//! │                                         WorkItems                    │
//! │                                             │                        │
//! │   NameLookup ◄──── workers ◄──────── Scheduler (separate crate)      │
//! │                       │                                              │
//! │                 EnrichmentResults                                    │
//! │                       │                                              │
//! │                       ▼                                              │
//! │   current ─────► Merge Engine ──► FinalRecords (code order kept)     │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is synchronous, deterministic, and free of I/O; the
//! scheduler and the store live in sibling crates and consume this one
//! through the [`CatalogSource`], [`NameLookup`], and record types.

pub mod diff;
pub mod lookup;
pub mod merge;
pub mod record;
pub mod select;
pub mod snapshot;
pub mod source;

pub use diff::{diff, ChangeReport, CodeName, NameChange};
pub use lookup::{LookupError, LookupRecord, NameLookup};
pub use merge::{merge, EnrichmentResult, FinalRecord, NameSource};
pub use record::{BusStop, RawStopRecord};
pub use select::{select_targets, EnrichmentReason, WorkItem};
pub use snapshot::{normalize_code, MalformedCode, NormalizeSummary, Snapshot, CODE_WIDTH};
pub use source::{CatalogSource, SourceError};
