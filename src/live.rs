//! # Live Queries
//!
//! Push-based observation over a [`RunStore`]. Every query opened through a
//! [`RunRepository`] keeps its result current: after each successful insert
//! or delete the repository re-evaluates the open queries and publishes
//! changed results on a `tokio::sync::watch` channel. Callers hold a
//! [`LiveQuery`] and read or await it; they never re-issue the query.
//!
//! Queries whose last [`LiveQuery`] handle was dropped are pruned on the
//! next refresh.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::watch;

use crate::error::{Result, TrackerError};
use crate::store::{RunRecord, RunStatistics, RunStore, SortType};

/// Re-evaluates one open query; returns false once nobody observes it.
type Refresher<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

/// Observable result of a store query.
#[derive(Debug, Clone)]
pub struct LiveQuery<T> {
    receiver: watch::Receiver<T>,
}

impl<T: Clone> LiveQuery<T> {
    /// Current result. Reading twice yields the same value until the store
    /// changes.
    pub fn get(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Current result, marking it as seen.
    pub fn get_and_mark_seen(&mut self) -> T {
        self.receiver.borrow_and_update().clone()
    }

    /// Whether a new result was published since the last mark.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the next published result. Returns false when the
    /// repository has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// Run store wrapper publishing live query results.
pub struct RunRepository<S: RunStore> {
    store: Arc<S>,
    refreshers: Mutex<Vec<Refresher<S>>>,
}

impl<S: RunStore + 'static> RunRepository<S> {
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            refreshers: Mutex::new(Vec::new()),
        }
    }

    /// Underlying store, for one-shot reads.
    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a run and refresh open queries.
    ///
    /// Storage errors are returned unchanged; nothing is published then.
    pub fn insert_run(&self, run: RunRecord) -> Result<RunRecord> {
        let saved = self.store.insert_run(run)?;
        self.refresh();
        Ok(saved)
    }

    /// Delete a run and refresh open queries.
    pub fn delete_run(&self, run: &RunRecord) -> Result<bool> {
        let removed = self.store.delete_run(run)?;
        if removed {
            self.refresh();
        }
        Ok(removed)
    }

    // ========================================================================
    // Live reads
    // ========================================================================

    pub fn runs_sorted(&self, sort: SortType) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.observe(move |store: &S| store.runs_sorted(sort))
    }

    pub fn runs_sorted_by_date(&self) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.runs_sorted(SortType::Date)
    }

    pub fn runs_sorted_by_time_in_millis(&self) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.runs_sorted(SortType::RunningTime)
    }

    pub fn runs_sorted_by_calories_burned(&self) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.runs_sorted(SortType::Calories)
    }

    pub fn runs_sorted_by_avg_speed(&self) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.runs_sorted(SortType::AvgSpeed)
    }

    pub fn runs_sorted_by_distance(&self) -> Result<LiveQuery<Vec<RunRecord>>> {
        self.runs_sorted(SortType::Distance)
    }

    pub fn total_time_in_millis(&self) -> Result<LiveQuery<Option<i64>>> {
        self.observe(|store: &S| store.total_time_in_millis())
    }

    pub fn total_calories_burned(&self) -> Result<LiveQuery<Option<i64>>> {
        self.observe(|store: &S| store.total_calories_burned())
    }

    pub fn total_distance(&self) -> Result<LiveQuery<Option<i64>>> {
        self.observe(|store: &S| store.total_distance())
    }

    pub fn total_avg_speed(&self) -> Result<LiveQuery<Option<f32>>> {
        self.observe(|store: &S| store.total_avg_speed())
    }

    /// All four aggregates as one observable value.
    pub fn statistics(&self) -> Result<LiveQuery<RunStatistics>> {
        self.observe(|store: &S| store.statistics())
    }

    /// Open a live query. The query runs once now; errors from that first
    /// run are returned.
    ///
    /// The first run and the registration happen under the refreshers lock,
    /// so a write racing with this call is either seen by the first run or
    /// refreshes the query afterwards.
    pub fn observe<T, Q>(&self, query: Q) -> Result<LiveQuery<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        Q: Fn(&S) -> Result<T> + Send + Sync + 'static,
    {
        let mut refreshers = self
            .refreshers
            .lock()
            .map_err(|_| TrackerError::lock_poisoned("live queries"))?;

        let initial = query(&self.store)?;
        let (sender, receiver) = watch::channel(initial);

        let refresher: Refresher<S> = Box::new(move |store: &S| {
            if sender.is_closed() {
                return false;
            }
            match query(store) {
                Ok(value) => {
                    sender.send_if_modified(|current| {
                        if *current == value {
                            false
                        } else {
                            *current = value;
                            true
                        }
                    });
                }
                // Keep the last good value; the next change retries
                Err(e) => warn!("[RunRepository] Live query refresh failed: {}", e),
            }
            true
        });

        refreshers.push(refresher);

        Ok(LiveQuery { receiver })
    }

    /// Number of queries still observed.
    pub fn live_query_count(&self) -> usize {
        self.refreshers.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn refresh(&self) {
        // A query panicked during an earlier refresh; the list itself is intact
        let mut refreshers = self
            .refreshers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let before = refreshers.len();
        refreshers.retain(|refresh| refresh(&self.store));
        let pruned = before - refreshers.len();

        if pruned > 0 {
            debug!("[RunRepository] Pruned {} unobserved queries", pruned);
        }
        debug!(
            "[RunRepository] Refreshed {} live queries",
            refreshers.len()
        );
    }
}
