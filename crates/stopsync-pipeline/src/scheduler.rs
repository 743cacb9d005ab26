//! Bounded-concurrency lookup scheduler with periodic checkpoints.
//!
//! A fixed pool of workers drains a shared queue of [`WorkItem`]s; each
//! worker runs one lookup at a time under a per-item timeout and capped
//! retries, then sends the [`EnrichmentResult`] to the single aggregator.
//! Only the aggregator touches the result collection, so no lock guards it.
//! Every `batch_size` completions (or after `checkpoint_interval` without a
//! write) the aggregator rewrites the checkpoint and progress files; a
//! checkpoint write failure is logged and the run continues on the
//! in-memory results.
//!
//! Shutdown is cooperative: workers poll the flag between items, so an
//! in-flight lookup always finishes and its result is kept, but nothing new
//! is dispatched once the flag is up.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use stopsync_catalog::{EnrichmentResult, NameLookup, WorkItem};
use stopsync_store::{ProgressState, SnapshotStore};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size. The effective pool never exceeds the item count.
    pub concurrency: usize,
    /// Completions between checkpoint writes.
    pub batch_size: usize,
    /// Per-item deadline covering all retry attempts' individual calls.
    pub lookup_timeout: Duration,
    /// Attempts per item for transport-level failures. A definitive empty
    /// answer is not retried.
    pub max_attempts: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub retry_delay: Duration,
    /// Checkpoint even mid-batch once this much time has passed.
    pub checkpoint_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 20,
            lookup_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            checkpoint_interval: Duration::from_secs(300),
        }
    }
}

/// What one scheduler run produced.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentOutcome {
    /// Seed results plus one result per dispatched item, at most one per code.
    pub results: Vec<EnrichmentResult>,
    pub succeeded: usize,
    pub failed: usize,
    /// True when shutdown cut the run short with items still queued.
    pub interrupted: bool,
    pub checkpoints_written: usize,
}

impl EnrichmentOutcome {
    fn from_results(results: Vec<EnrichmentResult>, interrupted: bool, checkpoints: usize) -> Self {
        let succeeded = results.iter().filter(|result| result.success).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
            interrupted,
            checkpoints_written: checkpoints,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct EnrichmentScheduler {
    lookup: Arc<dyn NameLookup>,
    store: Arc<dyn SnapshotStore>,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
}

impl EnrichmentScheduler {
    pub fn new(
        lookup: Arc<dyn NameLookup>,
        store: Arc<dyn SnapshotStore>,
        config: SchedulerConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            lookup,
            store,
            config,
            shutdown,
        }
    }

    /// Drives every item to a result and returns them together with the
    /// seed. With no items the seed is returned untouched and no worker is
    /// spawned, so a lookup collaborator is never contacted for a run with
    /// nothing to do.
    pub async fn run(
        &self,
        run_date: NaiveDate,
        items: Vec<WorkItem>,
        seed: Vec<EnrichmentResult>,
    ) -> EnrichmentOutcome {
        if items.is_empty() {
            if !seed.is_empty() {
                info!(restored = seed.len(), "every target already has a checkpointed result");
            }
            return EnrichmentOutcome::from_results(seed, false, 0);
        }

        let total = items.len() + seed.len();
        let batch_size = self.config.batch_size.max(1);
        let workers = self.config.concurrency.max(1).min(items.len());
        let item_codes: Vec<String> = items.iter().map(|item| item.code.clone()).collect();
        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::channel::<EnrichmentResult>(workers);

        info!(
            targets = item_codes.len(),
            restored = seed.len(),
            workers,
            "dispatching lookups"
        );

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            handles.push(tokio::spawn(worker(
                id,
                queue.clone(),
                self.lookup.clone(),
                self.config.clone(),
                self.shutdown.clone(),
                tx.clone(),
            )));
        }
        drop(tx);

        let mut results = seed;
        let mut completed_this_run = 0usize;
        let mut checkpoints = 0usize;
        let mut last_checkpoint = Instant::now();

        while let Some(result) = rx.recv().await {
            results.push(result);
            completed_this_run += 1;
            let due = completed_this_run % batch_size == 0
                || last_checkpoint.elapsed() >= self.config.checkpoint_interval;
            if due {
                self.checkpoint(run_date, &results, &item_codes, &mut checkpoints);
                last_checkpoint = Instant::now();
            }
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "lookup worker panicked");
            }
        }

        let interrupted = self.shutdown.load(Ordering::SeqCst) && results.len() < total;
        if interrupted {
            // Flush whatever finished so a resumed run starts from here.
            self.checkpoint(run_date, &results, &item_codes, &mut checkpoints);
            warn!(
                completed = results.len(),
                total, "shutdown requested; stopping with items still queued"
            );
        }

        EnrichmentOutcome::from_results(results, interrupted, checkpoints)
    }

    fn checkpoint(
        &self,
        run_date: NaiveDate,
        results: &[EnrichmentResult],
        item_codes: &[String],
        written: &mut usize,
    ) {
        match self.store.persist_checkpoint(run_date, results) {
            Ok(path) => {
                *written += 1;
                debug!(path = %path.display(), completed = results.len(), "checkpoint written");
            }
            Err(err) => {
                warn!(error = %err, "checkpoint write failed; continuing on in-memory results");
                return;
            }
        }

        let done: HashSet<&str> = results.iter().map(|result| result.code.as_str()).collect();
        let completed: Vec<String> = results.iter().map(|result| result.code.clone()).collect();
        let remaining: Vec<String> = item_codes
            .iter()
            .filter(|code| !done.contains(code.as_str()))
            .cloned()
            .collect();
        let progress = ProgressState::new(completed, remaining);
        if let Err(err) = self.store.persist_progress(run_date, &progress) {
            warn!(error = %err, "progress write failed");
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn worker(
    id: usize,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    lookup: Arc<dyn NameLookup>,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
    tx: mpsc::Sender<EnrichmentResult>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!(worker = id, "shutdown flagged; taking no more items");
            break;
        }
        let Some(item) = queue.lock().pop_front() else {
            break;
        };
        let result = lookup_item(lookup.as_ref(), &item, &config).await;
        if tx.send(result).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "worker finished");
}

/// Runs one item to a definitive result. Transport errors and timeouts are
/// retried with a linearly growing delay up to `max_attempts`; an answer
/// that arrives (even an empty one) settles the item immediately. Never
/// returns an error: a failure becomes a failed result for just this item.
async fn lookup_item(
    lookup: &dyn NameLookup,
    item: &WorkItem,
    config: &SchedulerConfig,
) -> EnrichmentResult {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match timeout(config.lookup_timeout, lookup.fetch(&item.code)).await {
            Ok(Ok(record)) => {
                return if record.is_success() {
                    EnrichmentResult::success(&item.code, record.description)
                } else {
                    debug!(code = %item.code, "lookup returned no data for this code");
                    EnrichmentResult::failure(&item.code, None)
                };
            }
            Ok(Err(err)) => {
                last_error = err.to_string();
                warn!(code = %item.code, attempt, error = %err, "lookup attempt failed");
            }
            Err(_) => {
                last_error = format!("timed out after {:?}", config.lookup_timeout);
                warn!(code = %item.code, attempt, "lookup attempt timed out");
            }
        }
        if attempt < max_attempts {
            sleep(config.retry_delay * attempt).await;
        }
    }

    EnrichmentResult::failure(&item.code, Some(last_error))
}

// ============================================================================
// Tests
// ============================================================================
