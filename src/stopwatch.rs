//! # Stopwatch
//!
//! The run-tracking state machine: elapsed time, the "currently tracking"
//! flag and the recorded path, driven by explicit transitions, periodic
//! ticks and incoming position fixes.
//!
//! ```text
//!            start                 pause
//!   Idle ──────────────▶ Tracking ───────▶ Paused
//!    ▲                     ▲  │               │
//!    │                     │  │ stop          │ resume
//!    │ (reset)             │  ▼               │
//!  Killed ◀────────────────┴──────────────────┘
//!                 stop (from Paused)
//! ```
//!
//! The stopwatch is a plain value with no timer and no locking of its own;
//! time comes from an injected [`Clock`] reading passed into every call.
//! [`TrackingService`](crate::service::TrackingService) owns one behind a
//! lock and drives it.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Bounds, GpsPoint, Polyline};

// ============================================================================
// Clocks
// ============================================================================

/// Source of monotonic milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock backed by the tokio timer.
///
/// Follows tokio's paused test clock, which keeps timer-driven tests
/// deterministic.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// State
// ============================================================================

/// Lifecycle phase of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum TrackingPhase {
    /// Nothing recorded yet
    Idle,
    /// Clock running, fixes recorded
    Tracking,
    /// Clock frozen, fixes dropped
    Paused,
    /// Run stopped; state reset, a new start begins a fresh run
    Killed,
}

impl TrackingPhase {
    pub fn is_tracking(self) -> bool {
        self == TrackingPhase::Tracking
    }

    /// Whether a run is in progress (tracking or paused).
    pub fn is_active(self) -> bool {
        matches!(self, TrackingPhase::Tracking | TrackingPhase::Paused)
    }
}

/// Outcome of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Resumed,
    Paused,
    Stopped,
    /// Request did not apply in the current phase
    Ignored,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self != Transition::Ignored
    }
}

/// Read-only copy of the tracking state handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub phase: TrackingPhase,
    pub polylines: Vec<Polyline>,
    pub time_run_millis: u64,
}

impl TrackingSnapshot {
    pub fn is_tracking(&self) -> bool {
        self.phase.is_tracking()
    }

    /// Bounds of the whole track, for framing the map before a snapshot.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_polylines(&self.polylines)
    }

    /// Track length so far in whole meters.
    pub fn distance_meters(&self) -> i32 {
        crate::geo_utils::track_length_meters(&self.polylines)
    }
}

/// Stopwatch and path accumulator for one run at a time.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    phase: TrackingPhase,
    polylines: Vec<Polyline>,
    /// Time accumulated over finished laps
    time_run: u64,
    /// Clock reading when the current lap began
    time_started: u64,
    /// Last published elapsed time
    time_run_millis: u64,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            phase: TrackingPhase::Idle,
            polylines: Vec::new(),
            time_run: 0,
            time_started: 0,
            time_run_millis: 0,
        }
    }

    pub fn phase(&self) -> TrackingPhase {
        self.phase
    }

    pub fn is_tracking(&self) -> bool {
        self.phase.is_tracking()
    }

    pub fn polylines(&self) -> &[Polyline] {
        &self.polylines
    }

    /// Elapsed tracking time as of the last tick or transition.
    pub fn time_run_millis(&self) -> u64 {
        self.time_run_millis
    }

    /// Elapsed tracking time in whole seconds.
    pub fn time_run_seconds(&self) -> u64 {
        self.time_run_millis / 1000
    }

    /// Number of segments currently accepting fixes (0 or 1).
    pub fn open_segment_count(&self) -> usize {
        if self.phase.is_tracking() && !self.polylines.is_empty() {
            1
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        TrackingSnapshot {
            phase: self.phase,
            polylines: self.polylines.clone(),
            time_run_millis: self.time_run_millis,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start a new run, or resume a paused one.
    ///
    /// Both open a new empty path segment, so the track shows a gap across
    /// the pause.
    pub fn start_or_resume(&mut self, now_ms: u64) -> Transition {
        let transition = match self.phase {
            TrackingPhase::Tracking => return Transition::Ignored,
            TrackingPhase::Idle | TrackingPhase::Killed => {
                self.reset();
                Transition::Started
            }
            TrackingPhase::Paused => Transition::Resumed,
        };

        self.polylines.push(Polyline::new());
        self.time_started = now_ms;
        self.phase = TrackingPhase::Tracking;
        transition
    }

    /// Freeze the clock and close the current path segment.
    pub fn pause(&mut self, now_ms: u64) -> Transition {
        if !self.phase.is_tracking() {
            return Transition::Ignored;
        }

        let lap = now_ms.saturating_sub(self.time_started);
        self.time_run = (self.time_run + lap).max(self.time_run_millis);
        self.time_run_millis = self.time_run;
        self.phase = TrackingPhase::Paused;
        Transition::Paused
    }

    /// End the run and discard its state. A second stop is a no-op.
    pub fn stop(&mut self) -> Transition {
        if !self.phase.is_active() {
            return Transition::Ignored;
        }
        self.reset();
        self.phase = TrackingPhase::Killed;
        Transition::Stopped
    }

    fn reset(&mut self) {
        self.polylines.clear();
        self.time_run = 0;
        self.time_started = 0;
        self.time_run_millis = 0;
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Recompute elapsed time. Returns the new value when it moved forward.
    pub fn tick(&mut self, now_ms: u64) -> Option<u64> {
        if !self.phase.is_tracking() {
            return None;
        }

        let lap = now_ms.saturating_sub(self.time_started);
        let elapsed = self.time_run + lap;
        if elapsed > self.time_run_millis {
            self.time_run_millis = elapsed;
            Some(elapsed)
        } else {
            None
        }
    }

    /// Append a batch of fixes to the open segment.
    ///
    /// Fixes are dropped unless tracking; invalid coordinates are always
    /// dropped. Returns how many fixes were recorded.
    pub fn add_fixes(&mut self, fixes: &[GpsPoint]) -> usize {
        if !self.phase.is_tracking() {
            if !fixes.is_empty() {
                debug!(
                    "[Stopwatch] Dropping {} fixes while {:?}",
                    fixes.len(),
                    self.phase
                );
            }
            return 0;
        }

        let Some(open) = self.polylines.last_mut() else {
            return 0;
        };

        let before = open.len();
        open.extend(fixes.iter().filter(|p| p.is_valid()).copied());
        let recorded = open.len() - before;

        if recorded < fixes.len() {
            debug!(
                "[Stopwatch] Dropped {} invalid fixes",
                fixes.len() - recorded
            );
        }
        recorded
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(i: u32) -> GpsPoint {
        GpsPoint::new(51.5 + i as f64 * 0.0001, -0.1278)
    }

    #[test]
    fn test_initial_state() {
        let sw = Stopwatch::new();
        assert_eq!(sw.phase(), TrackingPhase::Idle);
        assert!(sw.polylines().is_empty());
        assert_eq!(sw.time_run_millis(), 0);
        assert_eq!(sw.open_segment_count(), 0);
    }

    #[test]
    fn test_start_opens_segment() {
        let mut sw = Stopwatch::new();
        assert_eq!(sw.start_or_resume(1_000), Transition::Started);
        assert!(sw.is_tracking());
        assert_eq!(sw.polylines().len(), 1);
        assert!(sw.polylines()[0].is_empty());
        assert_eq!(sw.open_segment_count(), 1);

        // Starting again while tracking is ignored
        assert_eq!(sw.start_or_resume(2_000), Transition::Ignored);
        assert_eq!(sw.polylines().len(), 1);
    }

    #[test]
    fn test_elapsed_time_accumulates_across_laps() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(10_000);
        assert_eq!(sw.tick(10_050), Some(50));
        assert_eq!(sw.tick(11_000), Some(1_000));

        sw.pause(11_500);
        assert_eq!(sw.time_run_millis(), 1_500);

        // Time spent paused is not counted, ticks are ignored
        assert_eq!(sw.tick(20_000), None);
        assert_eq!(sw.time_run_millis(), 1_500);

        assert_eq!(sw.start_or_resume(30_000), Transition::Resumed);
        assert_eq!(sw.tick(30_200), Some(1_700));
        sw.pause(31_000);
        assert_eq!(sw.time_run_millis(), 2_500);
        assert_eq!(sw.time_run_seconds(), 2);
    }

    #[test]
    fn test_tick_is_idempotent_to_observe() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(0);
        sw.tick(500);
        assert_eq!(sw.time_run_millis(), 500);
        assert_eq!(sw.time_run_millis(), 500);
        // Same reading again publishes nothing new
        assert_eq!(sw.tick(500), None);
    }

    #[test]
    fn test_clock_going_backwards_never_decreases_elapsed() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(1_000);
        sw.tick(2_000);
        assert_eq!(sw.tick(1_500), None);
        sw.pause(1_200);
        assert_eq!(sw.time_run_millis(), 1_000);
    }

    #[test]
    fn test_fixes_only_recorded_while_tracking() {
        let mut sw = Stopwatch::new();
        assert_eq!(sw.add_fixes(&[fix(0)]), 0);

        sw.start_or_resume(0);
        assert_eq!(sw.add_fixes(&[fix(1), fix(2)]), 2);

        sw.pause(100);
        assert_eq!(sw.add_fixes(&[fix(3)]), 0);
        assert_eq!(sw.polylines()[0].len(), 2);
    }

    #[test]
    fn test_resume_opens_new_segment() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(0);
        sw.add_fixes(&[fix(1), fix(2)]);
        sw.pause(100);
        sw.start_or_resume(200);
        sw.add_fixes(&[fix(3)]);

        assert_eq!(sw.polylines().len(), 2);
        assert_eq!(sw.polylines()[0], vec![fix(1), fix(2)]);
        assert_eq!(sw.polylines()[1], vec![fix(3)]);
    }

    #[test]
    fn test_invalid_fixes_dropped() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(0);
        let recorded = sw.add_fixes(&[fix(1), GpsPoint::new(f64::NAN, 0.0), GpsPoint::new(95.0, 0.0)]);
        assert_eq!(recorded, 1);
    }

    #[test]
    fn test_stop_resets_and_is_idempotent() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(0);
        sw.add_fixes(&[fix(1)]);
        sw.tick(5_000);

        assert_eq!(sw.stop(), Transition::Stopped);
        assert_eq!(sw.phase(), TrackingPhase::Killed);
        assert!(sw.polylines().is_empty());
        assert_eq!(sw.time_run_millis(), 0);

        assert_eq!(sw.stop(), Transition::Ignored);
        assert_eq!(sw.phase(), TrackingPhase::Killed);
    }

    #[test]
    fn test_stop_from_idle_is_ignored() {
        let mut sw = Stopwatch::new();
        assert_eq!(sw.stop(), Transition::Ignored);
        assert_eq!(sw.phase(), TrackingPhase::Idle);
    }

    #[test]
    fn test_start_after_stop_begins_fresh_run() {
        let mut sw = Stopwatch::new();
        sw.start_or_resume(0);
        sw.add_fixes(&[fix(1)]);
        sw.tick(1_000);
        sw.stop();

        assert_eq!(sw.start_or_resume(50_000), Transition::Started);
        assert_eq!(sw.polylines().len(), 1);
        assert!(sw.polylines()[0].is_empty());
        assert_eq!(sw.tick(50_100), Some(100));
    }

    #[test]
    fn test_pause_requires_tracking() {
        let mut sw = Stopwatch::new();
        assert_eq!(sw.pause(0), Transition::Ignored);
        sw.start_or_resume(0);
        assert_eq!(sw.pause(10), Transition::Paused);
        assert_eq!(sw.pause(20), Transition::Ignored);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Start,
        Pause,
        Stop,
        Tick,
        Fix,
    }

    const OPS: [Op; 5] = [Op::Start, Op::Pause, Op::Stop, Op::Tick, Op::Fix];

    /// Every sequence of five operations keeps the structural invariants.
    #[test]
    fn test_invariants_hold_for_all_short_sequences() {
        let len = 5;
        let total = OPS.len().pow(len as u32);

        for mut code in 0..total {
            let mut sw = Stopwatch::new();
            let mut now = 0u64;
            let mut last_elapsed = 0u64;
            let mut closed: Vec<Polyline> = Vec::new();

            for _ in 0..len {
                let op = OPS[code % OPS.len()];
                code /= OPS.len();
                now += 37;

                let before_segments = sw.polylines().len();
                let transition = match op {
                    Op::Start => sw.start_or_resume(now),
                    Op::Pause => sw.pause(now),
                    Op::Stop => sw.stop(),
                    Op::Tick => {
                        sw.tick(now);
                        Transition::Ignored
                    }
                    Op::Fix => {
                        sw.add_fixes(&[fix(now as u32)]);
                        Transition::Ignored
                    }
                };

                assert!(sw.open_segment_count() <= 1);

                match transition {
                    Transition::Stopped => {
                        last_elapsed = 0;
                        closed.clear();
                    }
                    Transition::Started => {
                        assert_eq!(sw.polylines().len(), 1);
                        closed.clear();
                    }
                    Transition::Resumed => {
                        assert_eq!(sw.polylines().len(), before_segments + 1);
                    }
                    Transition::Paused => {
                        closed = sw.polylines().to_vec();
                    }
                    Transition::Ignored => {}
                }

                // Elapsed time never decreases within a run
                assert!(sw.time_run_millis() >= last_elapsed, "{:?}", op);
                last_elapsed = sw.time_run_millis();

                // Closed segments are never appended to again
                for (i, segment) in closed.iter().enumerate() {
                    assert_eq!(&sw.polylines()[i], segment);
                }
            }
        }
    }
}
