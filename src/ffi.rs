//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the tracker to
//! Kotlin and Swift. One global tracker owns the tokio runtime, the tracking
//! service and the SQLite run history; it is created by [`tracker_init`].
//!
//! The platform side owns the location subscription: it starts and stops
//! location updates when the listener reports a phase change and forwards
//! fixes through [`tracker_add_locations`].

use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::error::{Result, TrackerError};
use crate::{
    format_stopwatch_time, init_logging, GpsPoint, Polyline, RunRecord, RunRepository,
    RunStatistics, RunStore, SettingsStore, SortType, SqliteRunStore, TrackerConfig,
    TrackingNotifier, TrackingPhase, TrackingService, UserSettings,
};

// ============================================================================
// Callback Interfaces
// ============================================================================

/// Receives tracking updates, e.g. to drive a foreground notification.
/// Implement this in Kotlin/Swift.
///
/// Callbacks arrive in order on a dedicated listener thread, never on the
/// tracker's runtime, so a listener may call `tracker_*` functions.
#[uniffi::export(callback_interface)]
pub trait TrackingListener: Send + Sync {
    /// Called after every start, resume, pause and stop.
    fn on_tracking_state(&self, phase: TrackingPhase);

    /// Called when elapsed tracking time reaches a new whole second.
    fn on_elapsed_seconds(&self, seconds: u64);
}

enum ListenerEvent {
    State(TrackingPhase),
    Seconds(u64),
}

/// Forwards notifications to a listener thread. The thread exits once the
/// notifier is replaced or dropped.
struct ListenerNotifier {
    events: mpsc::UnboundedSender<ListenerEvent>,
}

impl ListenerNotifier {
    fn spawn(listener: Box<dyn TrackingListener>) -> Result<Self> {
        let (events, mut rx) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("run-tracker-listener".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    match event {
                        ListenerEvent::State(phase) => listener.on_tracking_state(phase),
                        ListenerEvent::Seconds(seconds) => listener.on_elapsed_seconds(seconds),
                    }
                }
                debug!("[RunTracker] Listener thread stopped");
            })
            .map_err(|e| TrackerError::Runtime {
                message: e.to_string(),
            })?;

        Ok(Self { events })
    }
}

impl TrackingNotifier for ListenerNotifier {
    fn on_tracking_state(&self, phase: TrackingPhase) {
        let _ = self.events.send(ListenerEvent::State(phase));
    }

    fn on_elapsed_seconds(&self, seconds: u64) {
        let _ = self.events.send(ListenerEvent::Seconds(seconds));
    }
}

/// Tracking state for a single UI refresh.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTrackingState {
    pub phase: TrackingPhase,
    /// Recorded path, one polyline per tracking interval
    pub polylines: Vec<Polyline>,
    pub time_run_millis: u64,
    /// Distance covered so far in whole meters
    pub distance_meters: i32,
}

// ============================================================================
// Global Tracker
// ============================================================================

struct FfiTracker {
    runtime: Runtime,
    service: TrackingService,
    repository: RunRepository<SqliteRunStore>,
}

impl FfiTracker {
    fn open(db_path: &str, config: TrackerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("run-tracker")
            .enable_time()
            .build()
            .map_err(|e| TrackerError::Runtime {
                message: e.to_string(),
            })?;

        let store = SqliteRunStore::new(db_path)?;

        Ok(Self {
            runtime,
            service: TrackingService::new(config),
            repository: RunRepository::new(store),
        })
    }
}

static TRACKER: Lazy<Mutex<Option<Arc<FfiTracker>>>> = Lazy::new(|| Mutex::new(None));

/// Run `f` against the global tracker, if initialized.
///
/// The global lock is released before `f` runs, so long operations do not
/// block other FFI calls.
fn with_tracker<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&FfiTracker) -> R,
{
    let tracker = TRACKER.lock().ok()?.clone();
    match tracker {
        Some(tracker) => Some(f(&tracker)),
        None => {
            warn!("[RunTracker] {}", TrackerError::NotInitialized);
            None
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Open the run database and create the tracking service.
///
/// Calling this again replaces the tracker; a run in progress is discarded.
#[uniffi::export]
pub fn tracker_init(db_path: String, config: Option<TrackerConfig>) -> bool {
    init_logging();
    info!("[RunTracker] Initializing with db: {}", db_path);

    match FfiTracker::open(&db_path, config.unwrap_or_default()) {
        Ok(tracker) => match TRACKER.lock() {
            Ok(mut guard) => {
                *guard = Some(Arc::new(tracker));
                info!("[RunTracker] Initialized successfully");
                true
            }
            Err(_) => {
                warn!("[RunTracker] {}", TrackerError::lock_poisoned("tracker"));
                false
            }
        },
        Err(e) => {
            warn!("[RunTracker] Failed to initialize: {}", e);
            false
        }
    }
}

#[uniffi::export]
pub fn tracker_is_initialized() -> bool {
    TRACKER
        .lock()
        .map(|guard| guard.is_some())
        .unwrap_or(false)
}

/// Register (or clear) the listener for tracking updates.
#[uniffi::export]
pub fn tracker_set_listener(listener: Option<Box<dyn TrackingListener>>) {
    init_logging();
    with_tracker(|t| {
        let notifier = match listener.map(ListenerNotifier::spawn).transpose() {
            Ok(notifier) => notifier.map(|n| Arc::new(n) as Arc<dyn TrackingNotifier>),
            Err(e) => {
                warn!("[RunTracker] Failed to start listener: {}", e);
                return;
            }
        };
        t.service.set_notifier(notifier);
    });
}

// ============================================================================
// Tracking
// ============================================================================

/// Start a new run or resume the paused one. Returns false when ignored.
#[uniffi::export]
pub fn tracker_start_or_resume() -> bool {
    init_logging();
    with_tracker(|t| t.runtime.block_on(t.service.start_or_resume()).is_applied())
        .unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_pause() -> bool {
    init_logging();
    with_tracker(|t| t.runtime.block_on(t.service.pause()).is_applied()).unwrap_or(false)
}

/// Stop and discard the run in progress.
#[uniffi::export]
pub fn tracker_stop() -> bool {
    init_logging();
    with_tracker(|t| t.runtime.block_on(t.service.cancel_run()).is_applied()).unwrap_or(false)
}

/// Forward a batch of location fixes. Returns how many were recorded.
#[uniffi::export]
pub fn tracker_add_locations(points: Vec<GpsPoint>) -> u32 {
    with_tracker(|t| t.service.on_location_result(&points) as u32).unwrap_or(0)
}

#[uniffi::export]
pub fn tracker_get_state() -> Option<FfiTrackingState> {
    with_tracker(|t| {
        let snapshot = t.service.snapshot();
        FfiTrackingState {
            phase: snapshot.phase,
            distance_meters: snapshot.distance_meters(),
            time_run_millis: snapshot.time_run_millis,
            polylines: snapshot.polylines,
        }
    })
}

/// Finish the run and save it, using the stored body weight for calories.
///
/// Returns the saved run, or None when no run was in progress or saving
/// failed (the run then stays paused).
#[uniffi::export]
pub fn tracker_finish_run(img: Option<Vec<u8>>) -> Option<RunRecord> {
    init_logging();
    with_tracker(|t| {
        let weight_kg = match t.repository.store().load_settings() {
            Ok(settings) => settings.weight_kg,
            Err(e) => {
                warn!("[RunTracker] Failed to load settings, using defaults: {}", e);
                UserSettings::default().weight_kg
            }
        };

        match t
            .runtime
            .block_on(t.service.finish_run(&t.repository, weight_kg, img))
        {
            Ok(saved) => saved,
            Err(e) => {
                warn!("[RunTracker] Failed to save run: {}", e);
                None
            }
        }
    })
    .flatten()
}

// ============================================================================
// Run History
// ============================================================================

#[uniffi::export]
pub fn tracker_get_runs(sort: SortType) -> Vec<RunRecord> {
    with_tracker(|t| {
        t.repository.store().runs_sorted(sort).unwrap_or_else(|e| {
            warn!("[RunTracker] Failed to load runs: {}", e);
            Vec::new()
        })
    })
    .unwrap_or_default()
}

#[uniffi::export]
pub fn tracker_delete_run(run: RunRecord) -> bool {
    init_logging();
    with_tracker(|t| {
        t.repository.delete_run(&run).unwrap_or_else(|e| {
            warn!("[RunTracker] Failed to delete run: {}", e);
            false
        })
    })
    .unwrap_or(false)
}

#[uniffi::export]
pub fn tracker_get_statistics() -> Option<RunStatistics> {
    with_tracker(|t| match t.repository.store().statistics() {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!("[RunTracker] Failed to load statistics: {}", e);
            None
        }
    })
    .flatten()
}

// ============================================================================
// Settings
// ============================================================================

#[uniffi::export]
pub fn tracker_get_settings() -> Option<UserSettings> {
    with_tracker(|t| t.repository.store().load_settings().ok()).flatten()
}

/// Validate and store the user settings. Returns false when rejected.
#[uniffi::export]
pub fn tracker_save_settings(settings: UserSettings) -> bool {
    init_logging();
    with_tracker(|t| match t.repository.store().save_settings(&settings) {
        Ok(()) => true,
        Err(e) => {
            warn!("[RunTracker] Settings not saved: {}", e);
            false
        }
    })
    .unwrap_or(false)
}

// ============================================================================
// Formatting
// ============================================================================

/// Format elapsed milliseconds as `HH:MM:SS` or `HH:MM:SS:cc`.
#[uniffi::export]
pub fn ffi_format_stopwatch_time(ms: u64, include_millis: bool) -> String {
    format_stopwatch_time(ms, include_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Seen {
        State(TrackingPhase, bool),
        Seconds(u64, bool),
    }

    /// Records each callback and whether it ran outside any tokio runtime.
    struct RecordingListener {
        seen: Mutex<std_mpsc::Sender<Seen>>,
    }

    impl TrackingListener for RecordingListener {
        fn on_tracking_state(&self, phase: TrackingPhase) {
            let outside = tokio::runtime::Handle::try_current().is_err();
            let _ = self.seen.lock().unwrap().send(Seen::State(phase, outside));
        }

        fn on_elapsed_seconds(&self, seconds: u64) {
            let outside = tokio::runtime::Handle::try_current().is_err();
            let _ = self.seen.lock().unwrap().send(Seen::Seconds(seconds, outside));
        }
    }

    #[test]
    fn test_listener_runs_outside_runtime() {
        let (tx, rx) = std_mpsc::channel();
        let notifier = ListenerNotifier::spawn(Box::new(RecordingListener {
            seen: Mutex::new(tx),
        }))
        .unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async {
            notifier.on_tracking_state(TrackingPhase::Tracking);
            notifier.on_elapsed_seconds(1);
            notifier.on_tracking_state(TrackingPhase::Paused);
        });

        let timeout = Duration::from_secs(5);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Seen::State(TrackingPhase::Tracking, true)
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), Seen::Seconds(1, true));
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Seen::State(TrackingPhase::Paused, true)
        );
    }

    #[test]
    fn test_listener_thread_stops_with_notifier() {
        let (tx, rx) = std_mpsc::channel();
        let notifier = ListenerNotifier::spawn(Box::new(RecordingListener {
            seen: Mutex::new(tx),
        }))
        .unwrap();
        drop(notifier);

        // The listener (and its sender) is dropped when the thread exits
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(std_mpsc::RecvTimeoutError::Disconnected)
        );
    }
}
