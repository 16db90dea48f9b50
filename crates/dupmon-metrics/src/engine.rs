//! Per-backup series built from recorded events.
//!
//! The registry maps backup names to series. It is insert-only: the write
//! lock is taken only to create a missing series, everything else takes the
//! read lock just long enough to clone the series handle. Each series has
//! its own mutex, so ingestion for one backup never waits on another.
//!
//! Locks are `std::sync` rather than tokio's: every critical section is
//! short and synchronous, and the scrape-time collector cannot `.await`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, TryLockError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use dupmon_events::{BackupEvent, BackupReport, FileStats, ResultState};

use crate::error::{EngineError, EngineResult};

/// Ratio reported before a backup has any recent activity.
const INITIAL_SUCCESS_RATIO: f64 = 1.0;

/// Longest accepted window. Keeps `now - window` well inside chrono's range.
const MAX_WINDOW: Duration = Duration::from_secs(366 * 86_400);

/// Complete metrics state for one backup.
#[derive(Debug)]
struct BackupSeries {
    /// Events ever recorded per result. Never decremented.
    cumulative: BTreeMap<ResultState, u64>,
    /// Arrival instants per result, in recording order.
    ///
    /// Grows by one entry per event and shrinks on prune, so its length is
    /// bounded by peak arrival rate × window length.
    recent: BTreeMap<ResultState, Vec<DateTime<Utc>>>,
    /// File statistics from the latest event, `None` until one arrives.
    files: Option<FileStats>,
    /// Last ratio computed over a non-empty window.
    sticky_ratio: f64,
}

impl BackupSeries {
    fn new() -> Self {
        Self {
            cumulative: BTreeMap::new(),
            recent: BTreeMap::new(),
            files: None,
            sticky_ratio: INITIAL_SUCCESS_RATIO,
        }
    }

    /// A series with every closed-set result present at zero.
    fn seeded() -> Self {
        let mut series = Self::new();
        for state in ResultState::KNOWN {
            series.recent.insert(state.clone(), Vec::new());
            series.cumulative.insert(state, 0);
        }
        series
    }

    /// Apply `event`, then refresh the ratio over the window ending at its instant.
    fn record(&mut self, event: &BackupEvent, window: TimeDelta) -> EngineResult<()> {
        let current = self.cumulative.get(&event.result).copied().unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| EngineError::CounterOverflow {
                backup: event.backup_name.clone(),
                result: event.result.clone(),
            })?;

        self.cumulative.insert(event.result.clone(), next);
        self.recent
            .entry(event.result.clone())
            .or_default()
            .push(event.observed_at);
        self.files = Some(event.file_stats);
        self.success_ratio(&event.backup_name, event.observed_at, window);
        Ok(())
    }

    /// Drop every instant that is no longer recent at `now`. Returns how
    /// many were removed.
    ///
    /// The ratio is refreshed first, so the last non-empty window is what
    /// sticks once the entries are gone.
    fn prune(&mut self, backup_name: &str, now: DateTime<Utc>, window: TimeDelta) -> usize {
        self.success_ratio(backup_name, now, window);
        let cutoff = now - window;
        let mut removed = 0;
        for stamps in self.recent.values_mut() {
            let before = stamps.len();
            stamps.retain(|t| *t > cutoff);
            removed += before - stamps.len();
        }
        removed
    }

    fn success_ratio(&mut self, backup_name: &str, now: DateTime<Utc>, window: TimeDelta) -> f64 {
        let floor = now - window;
        let mut total = 0usize;
        let mut success = 0usize;
        for (state, stamps) in &self.recent {
            let n = stamps.iter().filter(|t| **t > floor && **t <= now).count();
            total += n;
            if *state == ResultState::Success {
                success += n;
            }
        }

        if total == 0 {
            return self.sticky_ratio;
        }

        let ratio = success as f64 / total as f64;
        if !(0.0..=1.0).contains(&ratio) {
            warn!(backup = backup_name, ratio, "discarding out-of-range success ratio");
            return self.sticky_ratio;
        }
        self.sticky_ratio = ratio;
        ratio
    }

    fn snapshot(&self, backup_name: &str) -> SeriesSnapshot {
        SeriesSnapshot {
            backup_name: backup_name.to_string(),
            counts: self.cumulative.clone(),
            recent: self
                .recent
                .iter()
                .map(|(state, stamps)| (state.clone(), stamps.len()))
                .collect(),
            files: self.files,
            success_ratio: self.sticky_ratio,
        }
    }
}

/// Read-only view of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub backup_name: String,
    /// Cumulative event count per result.
    pub counts: BTreeMap<ResultState, u64>,
    /// Window length per result, including entries not yet pruned.
    pub recent: BTreeMap<ResultState, usize>,
    /// Latest file statistics, absent until the first real event.
    pub files: Option<FileStats>,
    /// Stored ratio as of the last computation. Reading it does not recompute.
    pub success_ratio: f64,
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Series swept.
    pub series: usize,
    /// Window entries removed.
    pub removed: usize,
    /// Series skipped because their lock was held.
    pub skipped: usize,
}

type SeriesHandle = Arc<Mutex<BackupSeries>>;

/// Shared registry of backup series.
///
/// `MetricsEngine` is `Send + Sync`; share it across tasks with an `Arc`.
#[derive(Debug)]
pub struct MetricsEngine {
    /// backup_name → series. Entries are never removed.
    series: RwLock<BTreeMap<String, SeriesHandle>>,
    /// How long an event counts as recent.
    window: TimeDelta,
}

impl MetricsEngine {
    /// Create an engine with the given recent-activity window.
    pub fn new(window: Duration) -> EngineResult<Self> {
        if window.is_zero() {
            return Err(EngineError::InvalidDuration(
                "window must be greater than zero".to_string(),
            ));
        }
        if window > MAX_WINDOW {
            return Err(EngineError::InvalidDuration(format!(
                "window must be at most {} days",
                MAX_WINDOW.as_secs() / 86_400
            )));
        }
        let window = TimeDelta::from_std(window)
            .map_err(|e| EngineError::InvalidDuration(format!("window out of range: {e}")))?;
        Ok(Self {
            series: RwLock::new(BTreeMap::new()),
            window,
        })
    }

    /// The recent-activity window.
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Record a validated report, stamped with the current instant.
    pub fn record_report(&self, report: BackupReport) -> EngineResult<()> {
        self.record_event(&report.observed_at(Utc::now()))
    }

    /// Record one event: bump its result counter, append its instant to the
    /// window and overwrite the file statistics.
    pub fn record_event(&self, event: &BackupEvent) -> EngineResult<()> {
        if event.backup_name.is_empty() {
            return Err(EngineError::EmptyBackupName);
        }
        let handle = self.get_or_create(&event.backup_name);
        lock_series(&handle).record(event, self.window)?;
        trace!(
            backup = %event.backup_name,
            result = %event.result,
            at = %event.observed_at,
            "event recorded"
        );
        Ok(())
    }

    /// Make sure a series exists with every closed-set result at zero.
    ///
    /// Leaves an existing series untouched. Returns whether one was created.
    pub fn preseed(&self, backup_name: &str) -> EngineResult<bool> {
        if backup_name.is_empty() {
            return Err(EngineError::EmptyBackupName);
        }
        if self.get(backup_name).is_some() {
            return Ok(false);
        }

        let mut registry = self.series.write().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(backup_name) {
            return Ok(false);
        }
        registry.insert(
            backup_name.to_string(),
            Arc::new(Mutex::new(BackupSeries::seeded())),
        );
        debug!(backup = backup_name, "series pre-seeded");
        Ok(true)
    }

    /// Success ratio over the window ending at `now`.
    ///
    /// With no events in the window the last computed ratio is returned
    /// unchanged (1.0 if none was ever computed). `None` for unknown backups.
    pub fn compute_success_ratio(&self, backup_name: &str, now: DateTime<Utc>) -> Option<f64> {
        let handle = self.get(backup_name)?;
        let ratio = lock_series(&handle).success_ratio(backup_name, now, self.window);
        Some(ratio)
    }

    /// Read-only view of one series.
    pub fn snapshot(&self, backup_name: &str) -> Option<SeriesSnapshot> {
        let handle = self.get(backup_name)?;
        let snapshot = lock_series(&handle).snapshot(backup_name);
        Some(snapshot)
    }

    /// Read-only views of every series, ordered by name.
    pub fn snapshots(&self) -> Vec<SeriesSnapshot> {
        self.handles()
            .into_iter()
            .map(|(name, handle)| lock_series(&handle).snapshot(&name))
            .collect()
    }

    /// Remove window entries that are no longer recent at `now`.
    ///
    /// Waits for each series lock in turn.
    pub fn prune(&self, now: DateTime<Utc>) -> PruneStats {
        let mut stats = PruneStats::default();
        for (name, handle) in self.handles() {
            stats.removed += lock_series(&handle).prune(&name, now, self.window);
            stats.series += 1;
        }
        stats
    }

    /// Like [`prune`](Self::prune), but never waits.
    ///
    /// Returns `None` if the registry itself is locked; series whose lock is
    /// held are skipped and counted in [`PruneStats::skipped`].
    pub fn try_prune(&self, now: DateTime<Utc>) -> Option<PruneStats> {
        let handles: Vec<(String, SeriesHandle)> = match self.series.try_read() {
            Ok(registry) => clone_handles(&registry),
            Err(TryLockError::Poisoned(poisoned)) => clone_handles(&poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => return None,
        };

        let mut stats = PruneStats::default();
        for (name, handle) in handles {
            let mut series = match handle.try_lock() {
                Ok(series) => series,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    stats.skipped += 1;
                    continue;
                }
            };
            stats.removed += series.prune(&name, now, self.window);
            stats.series += 1;
        }
        Some(stats)
    }

    /// Every registered backup name, in order.
    pub fn backup_names(&self) -> Vec<String> {
        self.read_registry().keys().cloned().collect()
    }

    /// Number of registered series.
    pub fn len(&self) -> usize {
        self.read_registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_registry().is_empty()
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, BTreeMap<String, SeriesHandle>> {
        self.series.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, backup_name: &str) -> Option<SeriesHandle> {
        self.read_registry().get(backup_name).cloned()
    }

    fn handles(&self) -> Vec<(String, SeriesHandle)> {
        clone_handles(&self.read_registry())
    }

    fn get_or_create(&self, backup_name: &str) -> SeriesHandle {
        if let Some(handle) = self.get(backup_name) {
            return handle;
        }
        let mut registry = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let handle = registry.entry(backup_name.to_string()).or_insert_with(|| {
            debug!(backup = backup_name, "series created");
            Arc::new(Mutex::new(BackupSeries::new()))
        });
        Arc::clone(handle)
    }
}

fn clone_handles(registry: &BTreeMap<String, SeriesHandle>) -> Vec<(String, SeriesHandle)> {
    registry
        .iter()
        .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
        .collect()
}

/// Every critical section leaves the series consistent, so a poisoned lock
/// is still safe to use.
fn lock_series(handle: &Mutex<BackupSeries>) -> MutexGuard<'_, BackupSeries> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
