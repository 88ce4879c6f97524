//! # Run Store
//!
//! Contract for the run history: completed runs are appended, removed by
//! identifier, listed in one of five descending orders and reduced to
//! aggregate totals. Aggregates are `None` for an empty history.
//!
//! [`InMemoryRunStore`] implements the contract without a database;
//! [`SqliteRunStore`](crate::persistence::SqliteRunStore) persists it.
//! Observation without re-querying is layered on top by
//! [`RunRepository`](crate::live::RunRepository).

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// A completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RunRecord {
    /// Assigned by the store on insertion, never reused
    pub id: Option<i64>,
    /// Map snapshot of the track (opaque image bytes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img: Option<Vec<u8>>,
    /// Completion time in epoch milliseconds
    pub timestamp: i64,
    /// Average speed in km/h
    pub avg_speed_kmh: f32,
    /// Distance in meters
    pub distance_meters: i32,
    /// Tracked time in milliseconds
    pub time_in_millis: i64,
    pub calories_burned: i32,
}

/// Sort orders for the run history; all descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SortType {
    Date,
    RunningTime,
    Calories,
    AvgSpeed,
    Distance,
}

impl SortType {
    pub const ALL: [SortType; 5] = [
        SortType::Date,
        SortType::RunningTime,
        SortType::Calories,
        SortType::AvgSpeed,
        SortType::Distance,
    ];

    /// Compare two records so that sorting yields this order, ties broken
    /// by newest identifier first.
    pub fn compare(self, a: &RunRecord, b: &RunRecord) -> CmpOrdering {
        let primary = match self {
            SortType::Date => b.timestamp.cmp(&a.timestamp),
            SortType::RunningTime => b.time_in_millis.cmp(&a.time_in_millis),
            SortType::Calories => b.calories_burned.cmp(&a.calories_burned),
            SortType::AvgSpeed => b.avg_speed_kmh.total_cmp(&a.avg_speed_kmh),
            SortType::Distance => b.distance_meters.cmp(&a.distance_meters),
        };
        primary.then_with(|| b.id.cmp(&a.id))
    }
}

/// Aggregates over the whole run history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RunStatistics {
    pub total_time_in_millis: Option<i64>,
    pub total_calories_burned: Option<i64>,
    pub total_distance_meters: Option<i64>,
    pub average_speed_kmh: Option<f32>,
}

/// Storage contract for completed runs.
pub trait RunStore: Send + Sync {
    /// Append a run and return it with its assigned identifier.
    ///
    /// Any identifier already on `run` is ignored.
    fn insert_run(&self, run: RunRecord) -> Result<RunRecord>;

    /// Remove a run by identifier. Returns whether a row was removed;
    /// removing an absent run is not an error.
    fn delete_run(&self, run: &RunRecord) -> Result<bool>;

    /// All runs in the given order.
    fn runs_sorted(&self, sort: SortType) -> Result<Vec<RunRecord>>;

    fn total_time_in_millis(&self) -> Result<Option<i64>>;

    fn total_calories_burned(&self) -> Result<Option<i64>>;

    fn total_distance(&self) -> Result<Option<i64>>;

    /// Mean of the per-run average speeds.
    fn total_avg_speed(&self) -> Result<Option<f32>>;

    fn run_count(&self) -> Result<usize>;

    fn runs_sorted_by_date(&self) -> Result<Vec<RunRecord>> {
        self.runs_sorted(SortType::Date)
    }

    fn runs_sorted_by_time_in_millis(&self) -> Result<Vec<RunRecord>> {
        self.runs_sorted(SortType::RunningTime)
    }

    fn runs_sorted_by_calories_burned(&self) -> Result<Vec<RunRecord>> {
        self.runs_sorted(SortType::Calories)
    }

    fn runs_sorted_by_avg_speed(&self) -> Result<Vec<RunRecord>> {
        self.runs_sorted(SortType::AvgSpeed)
    }

    fn runs_sorted_by_distance(&self) -> Result<Vec<RunRecord>> {
        self.runs_sorted(SortType::Distance)
    }

    fn statistics(&self) -> Result<RunStatistics> {
        Ok(RunStatistics {
            total_time_in_millis: self.total_time_in_millis()?,
            total_calories_burned: self.total_calories_burned()?,
            total_distance_meters: self.total_distance()?,
            average_speed_kmh: self.total_avg_speed()?,
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Run store kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryRunStore {
    runs: Mutex<Vec<RunRecord>>,
    next_id: AtomicI64,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn with_runs<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<RunRecord>) -> R,
    {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| TrackerError::lock_poisoned("in-memory run store"))?;
        Ok(f(&mut runs))
    }

    fn sum<F>(&self, field: F) -> Result<Option<i64>>
    where
        F: Fn(&RunRecord) -> i64,
    {
        self.with_runs(|runs| {
            if runs.is_empty() {
                None
            } else {
                Some(runs.iter().map(&field).sum())
            }
        })
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore for InMemoryRunStore {
    fn insert_run(&self, mut run: RunRecord) -> Result<RunRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        run.id = Some(id);
        self.with_runs(|runs| runs.push(run.clone()))?;
        info!("[RunStore] Inserted run {} ({}m)", id, run.distance_meters);
        Ok(run)
    }

    fn delete_run(&self, run: &RunRecord) -> Result<bool> {
        let Some(id) = run.id else {
            debug!("[RunStore] Delete of unsaved run ignored");
            return Ok(false);
        };
        let removed = self.with_runs(|runs| {
            let before = runs.len();
            runs.retain(|r| r.id != Some(id));
            runs.len() != before
        })?;
        if removed {
            info!("[RunStore] Deleted run {}", id);
        }
        Ok(removed)
    }

    fn runs_sorted(&self, sort: SortType) -> Result<Vec<RunRecord>> {
        self.with_runs(|runs| {
            let mut sorted = runs.clone();
            sorted.sort_by(|a, b| sort.compare(a, b));
            sorted
        })
    }

    fn total_time_in_millis(&self) -> Result<Option<i64>> {
        self.sum(|r| r.time_in_millis)
    }

    fn total_calories_burned(&self) -> Result<Option<i64>> {
        self.sum(|r| r.calories_burned as i64)
    }

    fn total_distance(&self) -> Result<Option<i64>> {
        self.sum(|r| r.distance_meters as i64)
    }

    fn total_avg_speed(&self) -> Result<Option<f32>> {
        self.with_runs(|runs| {
            if runs.is_empty() {
                return None;
            }
            let total: f64 = runs.iter().map(|r| r.avg_speed_kmh as f64).sum();
            Some((total / runs.len() as f64) as f32)
        })
    }

    fn run_count(&self) -> Result<usize> {
        self.with_runs(|runs| runs.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
