//! Run summary calculation.
//!
//! Derives the figures persisted with a finished run from its recorded path,
//! its elapsed time and the runner's body weight.

use serde::{Deserialize, Serialize};

use crate::geo_utils::track_length_meters;
use crate::store::RunRecord;
use crate::Polyline;

/// Average speed in km/h, rounded to one decimal place.
///
/// Returns 0 when no time has elapsed.
pub fn average_speed_kmh(distance_meters: i32, time_in_millis: i64) -> f32 {
    if time_in_millis <= 0 {
        return 0.0;
    }
    let km = distance_meters as f64 / 1000.0;
    let hours = time_in_millis as f64 / 1000.0 / 3600.0;
    ((km / hours * 10.0).round() / 10.0) as f32
}

/// Calories burned: kilometers times body weight in kilograms, truncated.
///
/// A deliberately simple heuristic; stored values depend on this exact formula.
pub fn calories_burned(distance_meters: i32, weight_kg: f32) -> i32 {
    (distance_meters as f64 / 1000.0 * weight_kg as f64) as i32
}

/// Figures computed at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RunSummary {
    /// Distance in whole meters, summed over all path segments
    pub distance_meters: i32,
    /// Elapsed tracking time in milliseconds (paused intervals excluded)
    pub time_in_millis: i64,
    /// Average speed in km/h
    pub avg_speed_kmh: f32,
    /// Calories burned
    pub calories_burned: i32,
}

impl RunSummary {
    /// Compute the summary from already-known totals.
    pub fn new(distance_meters: i32, time_in_millis: i64, weight_kg: f32) -> Self {
        Self {
            distance_meters,
            time_in_millis,
            avg_speed_kmh: average_speed_kmh(distance_meters, time_in_millis),
            calories_burned: calories_burned(distance_meters, weight_kg),
        }
    }

    /// Compute the summary from the recorded path segments of a run.
    pub fn from_track(polylines: &[Polyline], time_in_millis: i64, weight_kg: f32) -> Self {
        Self::new(track_length_meters(polylines), time_in_millis, weight_kg)
    }

    /// Turn the summary into a record ready for insertion.
    ///
    /// `timestamp` is the completion time in epoch milliseconds.
    pub fn into_record(self, timestamp: i64, img: Option<Vec<u8>>) -> RunRecord {
        RunRecord {
            id: None,
            img,
            timestamp,
            avg_speed_kmh: self.avg_speed_kmh,
            distance_meters: self.distance_meters,
            time_in_millis: self.time_in_millis,
            calories_burned: self.calories_burned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    #[test]
    fn test_average_speed() {
        // 5km in 30 minutes
        assert_eq!(average_speed_kmh(5000, 1_800_000), 10.0);
        // 3.3km in 20 minutes = 9.9 km/h
        assert_eq!(average_speed_kmh(3300, 1_200_000), 9.9);
    }

    #[test]
    fn test_average_speed_rounds_to_one_decimal() {
        // 1km in 7 minutes = 8.571.. km/h
        assert_eq!(average_speed_kmh(1000, 420_000), 8.6);
    }

    #[test]
    fn test_average_speed_zero_duration() {
        assert_eq!(average_speed_kmh(5000, 0), 0.0);
        assert_eq!(average_speed_kmh(0, 0), 0.0);
    }

    #[test]
    fn test_calories() {
        assert_eq!(calories_burned(5000, 80.0), 400);
        // Truncated, not rounded
        assert_eq!(calories_burned(1999, 80.0), 159);
        assert_eq!(calories_burned(0, 80.0), 0);
    }

    #[test]
    fn test_summary_from_track() {
        let polyline: Polyline = (0..10)
            .map(|i| GpsPoint::new(51.5 + i as f64 * 0.001, -0.1278))
            .collect();

        let summary = RunSummary::from_track(&[polyline], 600_000, 80.0);
        assert!(summary.distance_meters > 990 && summary.distance_meters < 1010);
        assert_eq!(summary.time_in_millis, 600_000);
        assert!(summary.avg_speed_kmh > 5.9 && summary.avg_speed_kmh < 6.1);
        assert_eq!(summary.calories_burned, calories_burned(summary.distance_meters, 80.0));
    }

    #[test]
    fn test_into_record() {
        let record = RunSummary::new(5000, 1_800_000, 80.0).into_record(1_700_000_000_000, None);
        assert_eq!(record.id, None);
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.avg_speed_kmh, 10.0);
        assert_eq!(record.calories_burned, 400);
    }
}
