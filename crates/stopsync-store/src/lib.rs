//! Snapshot store: the pipeline's single I/O boundary for dated artifacts.
//!
//! Everything the pipeline persists or rediscovers lives in one flat data
//! directory, keyed by ISO date labels so lexicographic order is
//! chronological:
//!
//! ```text
//! data/
//! ├── bus_stops_2025-06-01.csv      # normalized snapshot per run date
//! ├── bus_stops_2025-06-08.csv
//! ├── changes_2025-06-01_to_2025-06-08.csv
//! ├── checkpoint_2025-06-08.csv     # accumulated enrichment results
//! ├── progress_2025-06-08.json      # resume state for the scheduler
//! ├── corrections_20250608_091400.csv
//! └── corrections.csv               # stable copy, overwritten every run
//! ```
//!
//! Table layouts are stable interfaces: snapshots are
//! `code,name,street,lat,lon`, change reports are
//! `code,change_type,old_name,new_name`, and the final table is
//! `code,name,street,lat,lon,corrected_name,name_source`.
//!
//! Checkpoint and progress files are rewritten through a temp-file rename so
//! a crash mid-write cannot corrupt the resume source.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

use stopsync_catalog::{ChangeReport, EnrichmentResult, FinalRecord, RawStopRecord, Snapshot};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A file that exists but cannot be read as the table it claims to be.
    /// For a previous snapshot this is fatal to the run: a half-readable
    /// previous side would silently degrade the diff into a mass re-scrape.
    #[error("unreadable table {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("table encoding failed: {0}")]
    Encode(String),
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// Persistence operations the pipeline and the scheduler need. The runner
/// only talks to this trait, so tests can substitute an in-memory double.
pub trait SnapshotStore: Send + Sync {
    /// The newest snapshot captured strictly before `before`, or `None` on a
    /// first run. A snapshot file that exists but cannot be parsed is an
    /// error, not a first run.
    fn find_previous(&self, before: NaiveDate) -> Result<Option<Snapshot>, StoreError>;

    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf, StoreError>;

    fn persist_change_report(
        &self,
        report: &ChangeReport,
        previous: Option<NaiveDate>,
        current: NaiveDate,
    ) -> Result<PathBuf, StoreError>;

    /// Rewrites the accumulated result set for `run_date`. Called after
    /// every completed batch; a failure here is logged by the caller and
    /// the run continues.
    fn persist_checkpoint(
        &self,
        run_date: NaiveDate,
        results: &[EnrichmentResult],
    ) -> Result<PathBuf, StoreError>;

    /// Results accumulated by an earlier interrupted run on `run_date`.
    fn load_checkpoint(&self, run_date: NaiveDate)
        -> Result<Option<Vec<EnrichmentResult>>, StoreError>;

    fn persist_progress(
        &self,
        run_date: NaiveDate,
        progress: &ProgressState,
    ) -> Result<PathBuf, StoreError>;

    fn persist_final(
        &self,
        records: &[FinalRecord],
        produced_at: DateTime<Local>,
    ) -> Result<FinalArtifacts, StoreError>;
}

/// Where the final table landed: the dated file plus the stable copy that
/// downstream consumers watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalArtifacts {
    pub timestamped: PathBuf,
    pub stable: PathBuf,
}

/// Resume state written alongside each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub completed: Vec<String>,
    pub remaining: Vec<String>,
    pub timestamp: DateTime<Local>,
    pub total: usize,
    pub progress: String,
}

impl ProgressState {
    pub fn new(completed: Vec<String>, remaining: Vec<String>) -> Self {
        let total = completed.len() + remaining.len();
        let done = completed.len();
        let percent = if total == 0 {
            100.0
        } else {
            done as f64 / total as f64 * 100.0
        };
        Self {
            completed,
            remaining,
            timestamp: Local::now(),
            total,
            progress: format!("{done}/{total} ({percent:.1}%)"),
        }
    }
}

// ============================================================================
// Change Report Rows
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    New,
    Removed,
    NameChanged,
}

/// One row of the change report table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub code: String,
    pub change_type: ChangeType,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
}

fn change_rows(report: &ChangeReport) -> Vec<ChangeRow> {
    let mut rows = Vec::with_capacity(report.total_changes());
    for entry in &report.new {
        rows.push(ChangeRow {
            code: entry.code.clone(),
            change_type: ChangeType::New,
            old_name: None,
            new_name: Some(entry.name.clone()),
        });
    }
    for change in &report.name_changed {
        rows.push(ChangeRow {
            code: change.code.clone(),
            change_type: ChangeType::NameChanged,
            old_name: Some(change.old_name.clone()),
            new_name: Some(change.new_name.clone()),
        });
    }
    for entry in &report.removed {
        rows.push(ChangeRow {
            code: entry.code.clone(),
            change_type: ChangeType::Removed,
            old_name: Some(entry.name.clone()),
            new_name: None,
        });
    }
    rows
}

// ============================================================================
// Filesystem Store
// ============================================================================

const SNAPSHOT_PREFIX: &str = "bus_stops_";
const DATE_FORMAT: &str = "%Y-%m-%d";
const FINAL_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Flat-directory implementation of [`SnapshotStore`].
pub struct DataDirStore {
    config: StoreConfig,
}

impl DataDirStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir).map_err(|err| io_error(&config.data_dir, err))?;
        Ok(Self { config })
    }

    /// Convenience constructor over a bare directory path.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::new(StoreConfig {
            data_dir: data_dir.into(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn snapshot_path(&self, date: NaiveDate) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{SNAPSHOT_PREFIX}{}.csv", date.format(DATE_FORMAT)))
    }

    fn checkpoint_path(&self, date: NaiveDate) -> PathBuf {
        self.config
            .data_dir
            .join(format!("checkpoint_{}.csv", date.format(DATE_FORMAT)))
    }

    fn progress_path(&self, date: NaiveDate) -> PathBuf {
        self.config
            .data_dir
            .join(format!("progress_{}.json", date.format(DATE_FORMAT)))
    }

}

/// The capture date encoded in a snapshot file name, if the name follows
/// the `bus_stops_{YYYY-MM-DD}.csv` pattern.
pub fn snapshot_date_from_file_name(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(".csv")?;
    NaiveDate::parse_from_str(stem, DATE_FORMAT).ok()
}

/// Reads a snapshot table from an arbitrary path. A file that cannot be
/// parsed, has no rows, or loses every row to normalization is corrupt.
pub fn read_snapshot_table(path: &Path, captured_on: NaiveDate) -> Result<Snapshot, StoreError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| corrupt(path, err))?;
    let mut raw = Vec::new();
    for row in reader.deserialize::<RawStopRecord>() {
        raw.push(row.map_err(|err| corrupt(path, err))?);
    }
    if raw.is_empty() {
        return Err(corrupt(path, "snapshot table has no records"));
    }

    let (snapshot, summary) = Snapshot::from_raw(captured_on, raw);
    if snapshot.is_empty() {
        return Err(corrupt(path, "every record in the snapshot table is malformed"));
    }
    if summary.malformed > 0 || summary.duplicates > 0 {
        warn!(
            path = %path.display(),
            malformed = summary.malformed,
            duplicates = summary.duplicates,
            "stored snapshot required cleanup on load"
        );
    }
    Ok(snapshot)
}

/// Reads a final corrections table from an arbitrary path.
pub fn read_final_table(path: &Path) -> Result<Vec<FinalRecord>, StoreError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| corrupt(path, err))?;
    let mut records = Vec::new();
    for row in reader.deserialize::<FinalRecord>() {
        records.push(row.map_err(|err| corrupt(path, err))?);
    }
    Ok(records)
}

/// Writes a change report table to an arbitrary path.
pub fn write_change_report(path: &Path, report: &ChangeReport) -> Result<(), StoreError> {
    let bytes = encode_table(&change_rows(report))?;
    write_atomic(path, &bytes)
}

fn encode_table<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| StoreError::Encode(err.to_string()))
}

/// Writes through a sibling temp file and renames into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|err| io_error(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| io_error(path, err))?;
    Ok(())
}

impl SnapshotStore for DataDirStore {
    fn find_previous(&self, before: NaiveDate) -> Result<Option<Snapshot>, StoreError> {
        let mut newest: Option<(NaiveDate, PathBuf)> = None;
        for entry in WalkDir::new(&self.config.data_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| StoreError::Io {
                path: self.config.data_dir.clone(),
                source: io::Error::new(io::ErrorKind::Other, err),
            })?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = snapshot_date_from_file_name(&file_name) else {
                continue;
            };
            if date >= before {
                continue;
            }
            if newest.as_ref().map_or(true, |(found, _)| date > *found) {
                newest = Some((date, entry.into_path()));
            }
        }

        match newest {
            None => Ok(None),
            Some((date, path)) => read_snapshot_table(&path, date).map(Some),
        }
    }

    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<PathBuf, StoreError> {
        let path = self.snapshot_path(snapshot.captured_on);
        let bytes = encode_table(snapshot.records())?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    fn persist_change_report(
        &self,
        report: &ChangeReport,
        previous: Option<NaiveDate>,
        current: NaiveDate,
    ) -> Result<PathBuf, StoreError> {
        let current_label = current.format(DATE_FORMAT);
        let file_name = match previous {
            Some(previous) => format!(
                "changes_{}_to_{current_label}.csv",
                previous.format(DATE_FORMAT)
            ),
            None => format!("changes_{current_label}.csv"),
        };
        let path = self.config.data_dir.join(file_name);
        write_change_report(&path, report)?;
        Ok(path)
    }

    fn persist_checkpoint(
        &self,
        run_date: NaiveDate,
        results: &[EnrichmentResult],
    ) -> Result<PathBuf, StoreError> {
        let path = self.checkpoint_path(run_date);
        let bytes = encode_table(results)?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    fn load_checkpoint(
        &self,
        run_date: NaiveDate,
    ) -> Result<Option<Vec<EnrichmentResult>>, StoreError> {
        let path = self.checkpoint_path(run_date);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path).map_err(|err| corrupt(&path, err))?;
        let mut results = Vec::new();
        for row in reader.deserialize::<EnrichmentResult>() {
            results.push(row.map_err(|err| corrupt(&path, err))?);
        }
        Ok(Some(results))
    }

    fn persist_progress(
        &self,
        run_date: NaiveDate,
        progress: &ProgressState,
    ) -> Result<PathBuf, StoreError> {
        let path = self.progress_path(run_date);
        let json = serde_json::to_string_pretty(progress)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    fn persist_final(
        &self,
        records: &[FinalRecord],
        produced_at: DateTime<Local>,
    ) -> Result<FinalArtifacts, StoreError> {
        let bytes = encode_table(records)?;
        let timestamped = self.config.data_dir.join(format!(
            "corrections_{}.csv",
            produced_at.format(FINAL_STAMP_FORMAT)
        ));
        let stable = self.config.data_dir.join("corrections.csv");
        write_atomic(&timestamped, &bytes)?;
        write_atomic(&stable, &bytes)?;
        Ok(FinalArtifacts { timestamped, stable })
    }
}

// ============================================================================
// Tests
// ============================================================================
