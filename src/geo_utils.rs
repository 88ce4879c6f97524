//! Geographic utilities: distances along recorded paths.
//!
//! Distances are measured on the WGS84 ellipsoid (Karney's geodesic
//! algorithm from the `geo` crate), which matches what mobile location
//! stacks report for the distance between two fixes.

use geo::{Distance, Geodesic, Point};

use crate::{GpsPoint, Polyline};

/// Distance in meters between two GPS points.
pub fn distance_between(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    Geodesic::distance(to_point(p1), to_point(p2))
}

/// Total length of one path segment in meters.
///
/// Sums the distance between every adjacent pair of fixes. Segments with
/// fewer than two fixes measure zero.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .windows(2)
        .map(|pair| distance_between(&pair[0], &pair[1]))
        .sum()
}

/// Total length of a run in whole meters.
///
/// Each segment is truncated to whole meters before summing; gaps between
/// segments (paused intervals) are not counted.
pub fn track_length_meters(polylines: &[Polyline]) -> i32 {
    polylines
        .iter()
        .map(|polyline| polyline_length(polyline) as i32)
        .sum()
}

#[inline]
fn to_point(p: &GpsPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_polylines_measure_zero() {
        let p = GpsPoint::new(51.5074, -0.1278);
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[p]), 0.0);
        assert_eq!(polyline_length(&[p, p]), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // ~110.6km at the equator on WGS84
        let d = distance_between(&GpsPoint::new(0.0, 0.0), &GpsPoint::new(1.0, 0.0));
        assert!((d - 110_574.0).abs() < 50.0, "got {}", d);
    }

    #[test]
    fn test_all_adjacent_pairs_are_counted() {
        // Four points along a meridian, ~111m apart
        let points: Vec<GpsPoint> = (0..4)
            .map(|i| GpsPoint::new(51.5 + i as f64 * 0.001, -0.1278))
            .collect();

        let first_leg = distance_between(&points[0], &points[1]);
        let total = polyline_length(&points);

        assert!(first_leg > 100.0);
        // Three legs, including the first and the last one
        assert!((total - 3.0 * first_leg).abs() < 1.0, "got {}", total);
    }

    #[test]
    fn test_track_length_skips_gaps() {
        let a: Polyline = vec![GpsPoint::new(51.5, -0.1278), GpsPoint::new(51.501, -0.1278)];
        // Second segment starts far away; the gap must not count
        let b: Polyline = vec![GpsPoint::new(52.5, -0.1278), GpsPoint::new(52.501, -0.1278)];

        let expected = polyline_length(&a) as i32 + polyline_length(&b) as i32;
        assert_eq!(track_length_meters(&[a, b]), expected);
        assert!(expected < 300);
    }

    #[test]
    fn test_empty_track() {
        assert_eq!(track_length_meters(&[]), 0);
        assert_eq!(track_length_meters(&[vec![], vec![]]), 0);
    }
}
