//! # Run Tracker
//!
//! Run tracking core for a mobile fitness app.
//!
//! This library provides:
//! - A stopwatch/path accumulator state machine for one run at a time
//! - A background tracking service with a periodic ticker and observable state
//! - Geodesic distance, average speed and calorie calculations
//! - A run history store with sorted and aggregate live queries
//!
//! ## Features
//!
//! - **`persistence`** - SQLite run history and user settings (default)
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use run_tracker::{GpsPoint, RunSummary, Stopwatch};
//!
//! let mut stopwatch = Stopwatch::new();
//! stopwatch.start_or_resume(0);
//! stopwatch.add_fixes(&[
//!     GpsPoint::new(51.5074, -0.1278),
//!     GpsPoint::new(51.5084, -0.1278),
//! ]);
//! stopwatch.tick(60_000);
//! stopwatch.pause(60_000);
//!
//! let summary = RunSummary::from_track(
//!     stopwatch.polylines(),
//!     stopwatch.time_run_millis() as i64,
//!     80.0,
//! );
//! assert!(summary.distance_meters > 100);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackerError};

// Geographic utilities (distance along paths)
pub mod geo_utils;

// Run summary calculation (speed, calories)
pub mod summary;
pub use summary::{average_speed_kmh, calories_burned, RunSummary};

// Stopwatch formatting
pub mod format;
pub use format::format_stopwatch_time;

// Stopwatch / path accumulator state machine
pub mod stopwatch;
pub use stopwatch::{
    Clock, ManualClock, MonotonicClock, Stopwatch, TrackingPhase, TrackingSnapshot, Transition,
};

// Background tracking service (single writer over the stopwatch)
pub mod service;
pub use service::{LocationProvider, TrackingNotifier, TrackingObservers, TrackingService};

// Run history store contract and in-memory store
pub mod store;
pub use store::{InMemoryRunStore, RunRecord, RunStatistics, RunStore, SortType};

// Push-based observation over a run store
pub mod live;
pub use live::{LiveQuery, RunRepository};

// User settings (name, weight)
pub mod settings;
pub use settings::{InMemorySettings, SettingsStore, UserSettings};

// SQLite-backed run history
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteRunStore;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS position fix with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use run_tracker::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One continuous path segment, recorded between a resume and the next
/// pause or stop.
pub type Polyline = Vec<GpsPoint>;

/// Bounding box of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds covering every fix of every segment.
    pub fn from_polylines(polylines: &[Polyline]) -> Option<Self> {
        let mut bounds: Option<Self> = None;
        for p in polylines.iter().flatten() {
            let b = bounds.get_or_insert(Self {
                min_lat: p.latitude,
                max_lat: p.latitude,
                min_lng: p.longitude,
                max_lng: p.longitude,
            });
            b.min_lat = b.min_lat.min(p.latitude);
            b.max_lat = b.max_lat.max(p.latitude);
            b.min_lng = b.min_lng.min(p.longitude);
            b.max_lng = b.max_lng.max(p.longitude);
        }
        bounds
    }
}

/// Location provider accuracy hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LocationPriority {
    #[default]
    HighAccuracy,
    BalancedPowerAccuracy,
    LowPower,
}

/// Subscription parameters handed to the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationRequest {
    /// Desired interval between fixes in milliseconds
    pub interval_ms: u64,
    /// Fastest interval the provider may deliver fixes at
    pub fastest_interval_ms: u64,
    pub priority: LocationPriority,
}

/// Configuration for the tracking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackerConfig {
    /// How often the stopwatch recomputes elapsed time.
    /// Default: 50ms
    pub timer_update_interval_ms: u64,

    /// Desired interval between location fixes.
    /// Default: 5000ms
    pub location_update_interval_ms: u64,

    /// Fastest interval the provider may deliver fixes at.
    /// Default: 2000ms
    pub fastest_location_interval_ms: u64,

    /// Accuracy requested from the location provider.
    /// Default: HighAccuracy
    pub location_priority: LocationPriority,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timer_update_interval_ms: 50,
            location_update_interval_ms: 5000,
            fastest_location_interval_ms: 2000,
            location_priority: LocationPriority::HighAccuracy,
        }
    }
}

impl TrackerConfig {
    /// Location subscription used while tracking.
    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval_ms: self.location_update_interval_ms,
            fastest_interval_ms: self.fastest_location_interval_ms,
            priority: self.location_priority,
        }
    }

    pub(crate) fn timer_interval(&self) -> std::time::Duration {
        // A zero period would make the ticker spin
        std::time::Duration::from_millis(self.timer_update_interval_ms.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================
