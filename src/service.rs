//! # Tracking Service
//!
//! Long-lived owner of the in-progress run. Wraps a [`Stopwatch`] and is the
//! only code that mutates it:
//!
//! - transitions (start/resume, pause, stop) are serialized by an async
//!   transition lock that also owns the ticker task;
//! - the ticker recomputes elapsed time every `timer_update_interval_ms`;
//! - position fixes from the location provider are applied under the same
//!   stopwatch lock as ticks.
//!
//! Pausing or stopping first shuts the ticker down and waits for it to
//! finish, so no tick can land after the final state has been read.
//!
//! Observers read the state through `tokio::sync::watch` receivers
//! ([`TrackingObservers`]) and never block the writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::live::RunRepository;
use crate::stopwatch::{
    Clock, MonotonicClock, Stopwatch, TrackingPhase, TrackingSnapshot, Transition,
};
use crate::store::{RunRecord, RunStore};
use crate::summary::RunSummary;
use crate::{GpsPoint, LocationRequest, Polyline, TrackerConfig};

// ============================================================================
// Collaborators
// ============================================================================

/// Platform location subsystem.
pub trait LocationProvider: Send + Sync {
    /// Whether the user granted location access.
    fn has_permission(&self) -> bool;

    /// Begin delivering fixes; they arrive through
    /// [`TrackingService::on_location_result`].
    fn request_updates(&self, request: LocationRequest);

    fn remove_updates(&self);
}

/// Foreground status surface (e.g. an ongoing notification).
///
/// Callbacks run on the tracker's own task while a transition is in
/// progress; an implementation must not call back into the service
/// synchronously.
pub trait TrackingNotifier: Send + Sync {
    /// Called after every applied transition with the new phase.
    fn on_tracking_state(&self, phase: TrackingPhase);

    /// Called each time elapsed tracking time reaches a new whole second.
    fn on_elapsed_seconds(&self, _seconds: u64) {}
}

/// Receivers for the observable tracking state.
#[derive(Debug, Clone)]
pub struct TrackingObservers {
    pub phase: watch::Receiver<TrackingPhase>,
    pub path_points: watch::Receiver<Vec<Polyline>>,
    pub time_run_millis: watch::Receiver<u64>,
    pub time_run_seconds: watch::Receiver<u64>,
}

impl TrackingObservers {
    pub fn is_tracking(&self) -> bool {
        self.phase.borrow().is_tracking()
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Channels {
    phase: watch::Sender<TrackingPhase>,
    path_points: watch::Sender<Vec<Polyline>>,
    time_run_millis: watch::Sender<u64>,
    time_run_seconds: watch::Sender<u64>,
}

impl Channels {
    fn new() -> Self {
        Self {
            phase: watch::Sender::new(TrackingPhase::Idle),
            path_points: watch::Sender::new(Vec::new()),
            time_run_millis: watch::Sender::new(0),
            time_run_seconds: watch::Sender::new(0),
        }
    }

    /// Publish the elapsed time; returns the new whole-second value when it
    /// changed.
    fn publish_time(&self, stopwatch: &Stopwatch) -> Option<u64> {
        self.time_run_millis.send_replace(stopwatch.time_run_millis());
        let seconds = stopwatch.time_run_seconds();
        let changed = self.time_run_seconds.send_if_modified(|current| {
            if *current == seconds {
                false
            } else {
                *current = seconds;
                true
            }
        });
        changed.then_some(seconds)
    }

    fn publish_all(&self, stopwatch: &Stopwatch) {
        self.phase.send_replace(stopwatch.phase());
        self.path_points.send_replace(stopwatch.polylines().to_vec());
        self.publish_time(stopwatch);
    }
}

/// State reachable from both the service and its ticker task.
struct Shared {
    stopwatch: Mutex<Stopwatch>,
    channels: Channels,
    clock: Arc<dyn Clock>,
    notifier: Mutex<Option<Arc<dyn TrackingNotifier>>>,
}

impl Shared {
    fn stopwatch(&self) -> MutexGuard<'_, Stopwatch> {
        // A panic in an observer callback must not take tracking down
        self.stopwatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notifier(&self) -> Option<Arc<dyn TrackingNotifier>> {
        self.notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a transition and publish the resulting state under the lock.
    fn apply<F>(&self, f: F) -> (Transition, TrackingPhase)
    where
        F: FnOnce(&mut Stopwatch) -> Transition,
    {
        let mut stopwatch = self.stopwatch();
        let transition = f(&mut stopwatch);
        if transition.is_applied() {
            self.channels.publish_all(&stopwatch);
        }
        (transition, stopwatch.phase())
    }

    fn on_tick(&self) {
        let now = self.clock.now_ms();
        let new_second = {
            let mut stopwatch = self.stopwatch();
            match stopwatch.tick(now) {
                Some(_) => self.channels.publish_time(&stopwatch),
                None => None,
            }
        };

        if let (Some(seconds), Some(notifier)) = (new_second, self.notifier()) {
            notifier.on_elapsed_seconds(seconds);
        }
    }
}

/// Handle on the running ticker task.
struct Ticker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(shared: Arc<Shared>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => shared.on_tick(),
                }
            }
            debug!("[TrackingService] Ticker stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the ticker and wait for an in-flight tick to complete.
    async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            warn!("[TrackingService] Ticker task ended abnormally: {}", e);
        }
    }
}

// ============================================================================
// Tracking Service
// ============================================================================

/// Single-writer owner of the in-progress run.
pub struct TrackingService {
    shared: Arc<Shared>,
    config: TrackerConfig,
    /// Transition lock; holds the ticker while tracking
    ticker: tokio::sync::Mutex<Option<Ticker>>,
    location_provider: Mutex<Option<Arc<dyn LocationProvider>>>,
}

impl TrackingService {
    /// Create a service timed by the monotonic tokio clock.
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                stopwatch: Mutex::new(Stopwatch::new()),
                channels: Channels::new(),
                clock,
                notifier: Mutex::new(None),
            }),
            config,
            ticker: tokio::sync::Mutex::new(None),
            location_provider: Mutex::new(None),
        }
    }

    pub fn set_location_provider(&self, provider: Option<Arc<dyn LocationProvider>>) {
        *self
            .location_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = provider;
    }

    pub fn set_notifier(&self, notifier: Option<Arc<dyn TrackingNotifier>>) {
        *self
            .shared
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = notifier;
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Subscribe to the tracking state.
    pub fn observe(&self) -> TrackingObservers {
        let channels = &self.shared.channels;
        TrackingObservers {
            phase: channels.phase.subscribe(),
            path_points: channels.path_points.subscribe(),
            time_run_millis: channels.time_run_millis.subscribe(),
            time_run_seconds: channels.time_run_seconds.subscribe(),
        }
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.shared.stopwatch().snapshot()
    }

    pub fn phase(&self) -> TrackingPhase {
        self.shared.stopwatch().phase()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start a new run or resume the paused one.
    pub async fn start_or_resume(&self) -> Transition {
        let mut ticker = self.ticker.lock().await;

        let now = self.shared.clock.now_ms();
        let (transition, phase) = self.shared.apply(|sw| sw.start_or_resume(now));
        if !transition.is_applied() {
            debug!("[TrackingService] Start ignored while {:?}", phase);
            return transition;
        }

        if let Some(stale) = ticker.take() {
            stale.shutdown().await;
        }
        *ticker = Some(Ticker::spawn(
            Arc::clone(&self.shared),
            self.config.timer_interval(),
        ));

        info!("[TrackingService] {:?}", transition);
        self.update_location_tracking(true);
        self.notify_state(phase);
        transition
    }

    /// Pause the run: freeze the clock and stop recording fixes.
    pub async fn pause(&self) -> Transition {
        let mut ticker = self.ticker.lock().await;
        self.pause_locked(&mut ticker).await
    }

    /// Stop the run and discard its state. Stopping twice is a no-op.
    pub async fn stop(&self) -> Transition {
        let mut ticker = self.ticker.lock().await;
        self.stop_locked(&mut ticker).await
    }

    /// Discard the run in progress without saving it.
    pub async fn cancel_run(&self) -> Transition {
        self.stop().await
    }

    /// Finish the run: pause, summarize, save, then reset.
    ///
    /// Returns `Ok(None)` when no run is in progress. When the store rejects
    /// the record the run stays paused and the error is returned, so the
    /// caller can retry or cancel.
    pub async fn finish_run<S: RunStore + 'static>(
        &self,
        repository: &RunRepository<S>,
        weight_kg: f32,
        img: Option<Vec<u8>>,
    ) -> Result<Option<RunRecord>> {
        let mut ticker = self.ticker.lock().await;
        self.pause_locked(&mut ticker).await;

        let snapshot = self.snapshot();
        if !snapshot.phase.is_active() {
            debug!("[TrackingService] Finish ignored while {:?}", snapshot.phase);
            return Ok(None);
        }

        let summary = RunSummary::from_track(
            &snapshot.polylines,
            snapshot.time_run_millis as i64,
            weight_kg,
        );
        let record = summary.into_record(Utc::now().timestamp_millis(), img);
        let saved = repository.insert_run(record)?;

        info!(
            "[TrackingService] Run saved: {}m in {}ms, {:.1} km/h, {} kcal",
            saved.distance_meters, saved.time_in_millis, saved.avg_speed_kmh, saved.calories_burned
        );

        self.stop_locked(&mut ticker).await;
        Ok(Some(saved))
    }

    async fn pause_locked(&self, ticker: &mut Option<Ticker>) -> Transition {
        if let Some(running) = ticker.take() {
            running.shutdown().await;
        }

        let now = self.shared.clock.now_ms();
        let (transition, phase) = self.shared.apply(|sw| sw.pause(now));
        if transition.is_applied() {
            info!(
                "[TrackingService] Paused at {}ms",
                *self.shared.channels.time_run_millis.borrow()
            );
            self.update_location_tracking(false);
            self.notify_state(phase);
        }
        transition
    }

    async fn stop_locked(&self, ticker: &mut Option<Ticker>) -> Transition {
        if let Some(running) = ticker.take() {
            running.shutdown().await;
        }

        let (transition, phase) = self.shared.apply(|sw| sw.stop());
        if transition.is_applied() {
            info!("[TrackingService] Stopped");
            self.update_location_tracking(false);
            self.notify_state(phase);
        } else {
            debug!("[TrackingService] Stop ignored while {:?}", phase);
        }
        transition
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Record a batch of fixes from the location provider.
    ///
    /// Fixes arriving while not tracking are dropped. Returns how many were
    /// recorded.
    pub fn on_location_result(&self, fixes: &[GpsPoint]) -> usize {
        let mut stopwatch = self.shared.stopwatch();
        let recorded = stopwatch.add_fixes(fixes);
        if recorded > 0 {
            self.shared
                .channels
                .path_points
                .send_replace(stopwatch.polylines().to_vec());
            debug!("[TrackingService] Recorded {} fixes", recorded);
        }
        recorded
    }

    fn update_location_tracking(&self, tracking: bool) {
        let provider = self
            .location_provider
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(provider) = provider else {
            return;
        };

        if !tracking {
            provider.remove_updates();
        } else if provider.has_permission() {
            provider.request_updates(self.config.location_request());
        } else {
            warn!("[TrackingService] No location permission; path will not be recorded");
        }
    }

    fn notify_state(&self, phase: TrackingPhase) {
        if let Some(notifier) = self.shared.notifier() {
            notifier.on_tracking_state(phase);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
