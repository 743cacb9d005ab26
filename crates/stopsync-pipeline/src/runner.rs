//! One full reconciliation run, end to end.
//!
//! The runner owns the step order and the failure policy between steps:
//! a source that cannot be fetched or a final table that cannot be written
//! aborts the run, while enrichment-level trouble (individual lookups,
//! checkpoint writes) degrades and is reported in the summary instead.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use stopsync_catalog::{
    diff, merge, select_targets, CatalogSource, EnrichmentResult, NameLookup, NameSource,
    Snapshot, SourceError, WorkItem,
};
use stopsync_store::{FinalArtifacts, SnapshotStore, StoreError};

use crate::scheduler::{EnrichmentOutcome, EnrichmentScheduler, SchedulerConfig};

// ============================================================================
// Errors and Configuration
// ============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("catalog source failed: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The source answered but nothing survived normalization. Persisting
    /// an empty snapshot would make the next run diff against nothing and
    /// flag the whole catalog as new.
    #[error("current catalog is empty after normalization")]
    EmptyCatalog,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Date label for every artifact of this run.
    pub run_date: NaiveDate,
    /// Cap on enrichment targets, applied after selection ordering.
    pub limit: Option<usize>,
    /// Restore checkpointed results from an earlier run on the same date.
    pub resume: bool,
    /// Produce the final table without contacting the lookup source.
    pub skip_enrichment: bool,
    pub scheduler: SchedulerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_date: Local::now().date_naive(),
            limit: None,
            resume: false,
            skip_enrichment: false,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_current: usize,
    pub total_previous: usize,
    pub new_count: usize,
    pub removed_count: usize,
    pub name_changed_count: usize,
    /// Final records whose corrected name came from the lookup source.
    pub enriched_count: usize,
    pub enrichment_success_count: usize,
    pub enrichment_failure_count: usize,
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    /// True when shutdown cut enrichment short. The final table still
    /// covers the full catalog; unfinished codes simply stay unenriched.
    pub interrupted: bool,
    pub final_table: FinalArtifacts,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    source: Arc<dyn CatalogSource>,
    lookup: Arc<dyn NameLookup>,
    store: Arc<dyn SnapshotStore>,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        lookup: Arc<dyn NameLookup>,
        store: Arc<dyn SnapshotStore>,
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            lookup,
            store,
            config,
            shutdown,
        }
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_date = self.config.run_date;

        info!(date = %run_date, "fetching current catalog");
        let raw = self.source.fetch_current().await?;
        let (current, normalization) = Snapshot::from_raw(run_date, raw);
        if normalization.malformed > 0 || normalization.duplicates > 0 {
            warn!(
                malformed = normalization.malformed,
                duplicates = normalization.duplicates,
                "normalization dropped records"
            );
        }
        if current.is_empty() {
            return Err(PipelineError::EmptyCatalog);
        }
        let snapshot_path = self.store.persist_snapshot(&current)?;
        info!(
            stops = current.len(),
            path = %snapshot_path.display(),
            "current snapshot persisted"
        );

        let previous = self.store.find_previous(run_date)?;
        let report = match &previous {
            Some(previous) => {
                info!(date = %previous.captured_on, stops = previous.len(), "comparing against previous snapshot");
                diff(previous, &current)
            }
            None => {
                info!("no previous snapshot found; every stop counts as new");
                diff(&Snapshot::empty(run_date), &current)
            }
        };
        info!(
            new = report.new.len(),
            removed = report.removed.len(),
            renamed = report.name_changed.len(),
            unchanged = report.unchanged.len(),
            "change detection finished"
        );

        if !report.is_unchanged() {
            let path = self.store.persist_change_report(
                &report,
                previous.as_ref().map(|snapshot| snapshot.captured_on),
                run_date,
            )?;
            info!(path = %path.display(), "change report persisted");
        }

        let mut items = select_targets(&report, self.config.limit);

        let outcome = if self.config.skip_enrichment {
            info!("enrichment disabled; catalog names pass through unchanged");
            EnrichmentOutcome::default()
        } else {
            let seed = if self.config.resume {
                self.restore_seed(&mut items)?
            } else {
                Vec::new()
            };
            if items.is_empty() && seed.is_empty() {
                info!("no enrichment targets for this run");
                EnrichmentOutcome::default()
            } else {
                let scheduler = EnrichmentScheduler::new(
                    self.lookup.clone(),
                    self.store.clone(),
                    self.config.scheduler.clone(),
                    self.shutdown.clone(),
                );
                scheduler.run(run_date, items, seed).await
            }
        };

        let records = merge(&current, &outcome.results);
        let enriched_count = records
            .iter()
            .filter(|record| record.name_source == NameSource::Enriched)
            .count();
        let final_table = self.store.persist_final(&records, Local::now())?;
        info!(
            records = records.len(),
            enriched = enriched_count,
            path = %final_table.stable.display(),
            "final table persisted"
        );

        let summary = RunSummary {
            total_current: current.len(),
            total_previous: previous.as_ref().map_or(0, Snapshot::len),
            new_count: report.new.len(),
            removed_count: report.removed.len(),
            name_changed_count: report.name_changed.len(),
            enriched_count,
            enrichment_success_count: outcome.succeeded,
            enrichment_failure_count: outcome.failed,
        };

        if outcome.interrupted {
            warn!("enrichment was interrupted; completed lookups are checkpointed and merged");
        }

        Ok(RunReport {
            summary,
            interrupted: outcome.interrupted,
            final_table,
        })
    }

    /// Loads checkpointed results and strips their codes from the work
    /// list. Asking to resume with an unreadable checkpoint is an error;
    /// silently redoing the whole workload would defeat the flag.
    fn restore_seed(&self, items: &mut Vec<WorkItem>) -> Result<Vec<EnrichmentResult>, PipelineError> {
        let Some(restored) = self.store.load_checkpoint(self.config.run_date)? else {
            return Ok(Vec::new());
        };
        let before = items.len();
        {
            let done: HashSet<&str> = restored.iter().map(|result| result.code.as_str()).collect();
            items.retain(|item| !done.contains(item.code.as_str()));
        }
        info!(
            restored = restored.len(),
            skipped = before - items.len(),
            "resuming from checkpoint"
        );
        Ok(restored)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw, run_date, Answer, MemoryStore, ScriptedLookup, StaticSource};
    use std::time::Duration;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        let records = entries
            .iter()
            .map(|(code, name)| raw(code, name))
            .collect::<Vec<_>>();
        Snapshot::from_raw(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), records).0
    }

    fn quick_scheduler() -> SchedulerConfig {
        SchedulerConfig {
            concurrency: 2,
            batch_size: 100,
            lookup_timeout: Duration::from_millis(100),
            max_attempts: 1,
            retry_delay: Duration::from_millis(0),
            checkpoint_interval: Duration::from_secs(300),
        }
    }

    fn pipeline(
        source: StaticSource,
        lookup: Arc<ScriptedLookup>,
        store: Arc<MemoryStore>,
        config: PipelineConfig,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(source),
            lookup,
            store,
            config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            run_date: run_date(),
            scheduler: quick_scheduler(),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn unchanged_catalog_never_contacts_the_lookup() {
        let store = Arc::new(MemoryStore::with_previous(snapshot(&[
            ("1", "Alpha"),
            ("2", "Beta"),
        ])));
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("X")));
        let source = StaticSource::serving(vec![raw("1", "Alpha"), raw("2", "Beta")]);

        let report = pipeline(source, lookup.clone(), store.clone(), config())
            .run()
            .await
            .unwrap();

        assert_eq!(lookup.call_count(), 0);
        assert_eq!(report.summary.new_count, 0);
        assert_eq!(report.summary.removed_count, 0);
        assert_eq!(report.summary.name_changed_count, 0);
        assert_eq!(report.summary.enriched_count, 0);
        assert_eq!(report.summary.total_current, 2);
        assert_eq!(report.summary.total_previous, 2);

        let state = store.state.lock();
        assert!(state.reports.is_empty(), "no change report for an unchanged catalog");
        assert_eq!(state.finals.len(), 1);
        assert!(state.finals[0]
            .iter()
            .all(|record| record.name_source == NameSource::Original));
    }

    #[tokio::test]
    async fn first_run_enriches_every_stop_as_new() {
        let store = Arc::new(MemoryStore::default());
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("Official")));
        let source = StaticSource::serving(vec![raw("1", "A"), raw("2", "B"), raw("3", "C")]);

        let report = pipeline(source, lookup.clone(), store.clone(), config())
            .run()
            .await
            .unwrap();

        assert_eq!(report.summary.total_previous, 0);
        assert_eq!(report.summary.new_count, 3);
        assert_eq!(report.summary.enrichment_success_count, 3);
        assert_eq!(report.summary.enriched_count, 3);
        assert_eq!(lookup.call_count(), 3);

        let state = store.state.lock();
        assert_eq!(state.reports.len(), 1, "an all-new report is still a report");
        assert_eq!(state.reports[0].1, None, "first run has no previous date label");
    }

    #[tokio::test]
    async fn source_failure_aborts_before_any_artifact() {
        let store = Arc::new(MemoryStore::default());
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("X")));

        let err = pipeline(StaticSource::down(), lookup, store.clone(), config())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Source(_)), "{err}");
        let state = store.state.lock();
        assert!(state.snapshots.is_empty());
        assert!(state.finals.is_empty());
    }

    #[tokio::test]
    async fn fully_malformed_catalog_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("X")));
        let source = StaticSource::serving(vec![raw("nan", "A"), raw("", "B")]);

        let err = pipeline(source, lookup, store.clone(), config())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::EmptyCatalog), "{err}");
        assert!(store.state.lock().snapshots.is_empty());
    }

    #[tokio::test]
    async fn renamed_stop_is_looked_up_and_merged_with_provenance() {
        let store = Arc::new(MemoryStore::with_previous(snapshot(&[
            ("1", "Alpha"),
            ("2", "Beta"),
        ])));
        let lookup =
            Arc::new(ScriptedLookup::answering(Answer::Empty).with_answer("00002", Answer::Name("Beta Proper")));
        let source = StaticSource::serving(vec![raw("1", "Alpha"), raw("2", "Beta Gardens")]);

        let report = pipeline(source, lookup.clone(), store.clone(), config())
            .run()
            .await
            .unwrap();

        assert_eq!(report.summary.name_changed_count, 1);
        assert_eq!(report.summary.enriched_count, 1);
        assert_eq!(lookup.call_count(), 1);

        let finals = store.last_final();
        assert_eq!(finals[0].corrected_name, "Alpha");
        assert_eq!(finals[0].name_source, NameSource::Original);
        assert_eq!(finals[1].corrected_name, "Beta Proper");
        assert_eq!(finals[1].name_source, NameSource::Enriched);
        assert_eq!(finals[1].name, "Beta Gardens", "catalog name is kept alongside");
    }

    #[tokio::test]
    async fn limit_caps_the_lookup_workload() {
        let store = Arc::new(MemoryStore::default());
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("N")));
        let source = StaticSource::serving(vec![
            raw("1", "A"),
            raw("2", "B"),
            raw("3", "C"),
            raw("4", "D"),
            raw("5", "E"),
        ]);
        let config = PipelineConfig {
            limit: Some(2),
            ..config()
        };

        let report = pipeline(source, lookup.clone(), store, config)
            .run()
            .await
            .unwrap();

        assert_eq!(lookup.call_count(), 2);
        assert_eq!(report.summary.enrichment_success_count, 2);
        assert_eq!(report.summary.enriched_count, 2);
        assert_eq!(report.summary.new_count, 5, "the report still covers everything");
    }

    #[tokio::test]
    async fn skip_enrichment_still_writes_the_final_table() {
        let store = Arc::new(MemoryStore::default());
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("N")));
        let source = StaticSource::serving(vec![raw("1", "A"), raw("2", "B")]);
        let config = PipelineConfig {
            skip_enrichment: true,
            ..config()
        };

        let report = pipeline(source, lookup.clone(), store.clone(), config)
            .run()
            .await
            .unwrap();

        assert_eq!(lookup.call_count(), 0);
        assert_eq!(report.summary.enriched_count, 0);

        let finals = store.last_final();
        assert_eq!(finals.len(), 2);
        assert!(finals.iter().all(|r| r.name_source == NameSource::Original));
        assert_eq!(finals[0].corrected_name, "A");
    }

    #[tokio::test]
    async fn resume_skips_codes_with_checkpointed_results() {
        let store = Arc::new(MemoryStore::default());
        store.state.lock().seeded_checkpoint = Some(vec![EnrichmentResult::success(
            "00001",
            Some("From Checkpoint".to_string()),
        )]);
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Name("Fresh")));
        let source = StaticSource::serving(vec![raw("1", "A"), raw("2", "B")]);
        let config = PipelineConfig {
            resume: true,
            ..config()
        };

        let report = pipeline(source, lookup.clone(), store.clone(), config)
            .run()
            .await
            .unwrap();

        assert_eq!(lookup.call_count(), 1);
        assert_eq!(lookup.calls.lock()[0], "00002");
        assert_eq!(report.summary.enriched_count, 2);

        let finals = store.last_final();
        assert_eq!(finals[0].corrected_name, "From Checkpoint");
        assert_eq!(finals[1].corrected_name, "Fresh");
    }

    #[tokio::test]
    async fn lookup_failures_fall_back_to_the_current_name() {
        let store = Arc::new(MemoryStore::with_previous(snapshot(&[("1", "Old Name")])));
        let lookup = Arc::new(ScriptedLookup::answering(Answer::Error));
        let source = StaticSource::serving(vec![raw("1", "New Name")]);

        let report = pipeline(source, lookup, store.clone(), config())
            .run()
            .await
            .unwrap();

        assert_eq!(report.summary.enrichment_failure_count, 1);
        assert_eq!(report.summary.enriched_count, 0);

        let finals = store.last_final();
        assert_eq!(finals[0].corrected_name, "New Name", "fallback is the current name");
        assert_eq!(finals[0].name_source, NameSource::Original);
    }
}
