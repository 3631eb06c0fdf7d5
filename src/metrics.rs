//! # Ride Metrics
//!
//! Turns the closed coordinate sequence of one ride into [`RideStats`].
//!
//! All functions are single-pass and total: short sequences, missing sensor
//! values and zero durations produce zeros rather than errors.

use serde::{Deserialize, Serialize};

use crate::geo_utils::fix_distance_km;
use crate::{GeoFix, Ride, RideStats};

/// Compute the full statistics for a ride.
///
/// # Arguments
/// * `coords` - Fixes in recording order
/// * `start_time` - Ride start, milliseconds since epoch
/// * `end_time` - Ride end, milliseconds since epoch
///
/// # Example
/// ```
/// use ride_tracker::{metrics::compute_stats, GeoFix};
///
/// let coords = vec![
///     GeoFix::new(0.0, 0.0, 0).with_altitude(100.0),
///     GeoFix::new(0.0, 0.01, 5_000).with_altitude(105.0),
/// ];
/// let stats = compute_stats(&coords, 0, 60_000);
/// assert_eq!(stats.elevation_gain, 5.0);
/// assert_eq!(stats.duration, 60.0);
/// ```
pub fn compute_stats(coords: &[GeoFix], start_time: i64, end_time: i64) -> RideStats {
    let distance = total_distance(coords);
    let duration = duration_seconds(start_time, end_time);

    RideStats {
        distance,
        duration,
        elevation_gain: elevation_gain(coords),
        max_speed: max_speed(coords),
        avg_speed: average_speed_kmh(distance, duration),
    }
}

/// Sum of consecutive haversine distances in kilometers.
pub fn total_distance(coords: &[GeoFix]) -> f64 {
    coords
        .windows(2)
        .map(|pair| fix_distance_km(&pair[0], &pair[1]))
        .sum()
}

/// Cumulative positive altitude change in meters.
///
/// Descents contribute nothing. Raw altitude deltas are used as-is.
pub fn elevation_gain(coords: &[GeoFix]) -> f64 {
    coords
        .windows(2)
        .map(|pair| (pair[1].sanitized_altitude() - pair[0].sanitized_altitude()).max(0.0))
        .sum()
}

/// Highest reported speed in m/s, 0 for an empty ride.
pub fn max_speed(coords: &[GeoFix]) -> f64 {
    coords
        .iter()
        .map(GeoFix::sanitized_speed)
        .fold(0.0, f64::max)
}

/// Wall-clock seconds between start and end. An end before the start
/// (clock skew) counts as zero.
pub fn duration_seconds(start_time: i64, end_time: i64) -> f64 {
    (end_time.saturating_sub(start_time) as f64 / 1000.0).max(0.0)
}

/// Average speed in km/h, 0 when the duration is not positive.
pub fn average_speed_kmh(distance_km: f64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        distance_km / (duration_secs / 3600.0)
    } else {
        0.0
    }
}

/// Lifetime totals shown on a rider's profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryTotals {
    pub ride_count: u32,
    /// Kilometers
    pub total_distance: f64,
    /// Meters
    pub total_elevation: f64,
}

impl HistoryTotals {
    /// Sum stored stats across rides.
    pub fn from_rides(rides: &[Ride]) -> Self {
        rides.iter().fold(Self::default(), |mut totals, ride| {
            totals.ride_count += 1;
            totals.total_distance += ride.stats.distance;
            totals.total_elevation += ride.stats.elevation_gain;
            totals
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_km;

    fn fix_at(lat: f64, lon: f64, alt: f64) -> GeoFix {
        GeoFix::new(lat, lon, 0).with_altitude(alt)
    }

    #[test]
    fn test_empty_and_single_fix() {
        let stats = compute_stats(&[], 0, 0);
        assert_eq!(stats, RideStats::default());

        let single = [fix_at(10.0, 10.0, 250.0).with_speed(4.0)];
        let stats = compute_stats(&single, 0, 10_000);
        assert_eq!(stats.distance, 0.0);
        assert_eq!(stats.elevation_gain, 0.0);
        assert_eq!(stats.max_speed, 4.0);
    }

    #[test]
    fn test_three_fix_ride() {
        let coords = [
            fix_at(0.0, 0.0, 100.0),
            fix_at(0.0, 0.01, 105.0),
            fix_at(0.0, 0.02, 102.0),
        ];
        let stats = compute_stats(&coords, 0, 120_000);

        assert_eq!(stats.elevation_gain, 5.0);
        let leg = haversine_km(0.0, 0.0, 0.0, 0.01);
        assert!((stats.distance - 2.0 * leg).abs() < 1e-9);
    }

    #[test]
    fn test_descents_never_subtract() {
        let mut coords = vec![fix_at(0.0, 0.0, 100.0), fix_at(0.0, 0.001, 130.0)];
        let before = elevation_gain(&coords);

        for (i, alt) in [120.0, 90.0, 50.0].iter().enumerate() {
            coords.push(fix_at(0.0, 0.002 + i as f64 * 0.001, *alt));
            assert!(elevation_gain(&coords) >= before);
        }
        assert_eq!(elevation_gain(&coords), 30.0);
    }

    #[test]
    fn test_average_speed() {
        assert_eq!(average_speed_kmh(10.0, 1800.0), 20.0);
        assert_eq!(average_speed_kmh(10.0, 0.0), 0.0);
        assert_eq!(average_speed_kmh(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_duration_uses_wall_clock() {
        // Fix timestamps span 10s, ride spans 30 minutes
        let coords = [
            GeoFix::new(0.0, 0.0, 1_000),
            GeoFix::new(0.0, 0.1, 11_000),
        ];
        let stats = compute_stats(&coords, 0, 1_800_000);
        assert_eq!(stats.duration, 1800.0);
    }

    #[test]
    fn test_clock_skew_clamps_duration() {
        assert_eq!(duration_seconds(10_000, 5_000), 0.0);
        let coords = [GeoFix::new(0.0, 0.0, 0), GeoFix::new(0.0, 0.1, 0)];
        let stats = compute_stats(&coords, 10_000, 5_000);
        assert_eq!(stats.avg_speed, 0.0);
    }

    #[test]
    fn test_missing_sensor_values_are_zero() {
        let coords = [
            fix_at(0.0, 0.0, f64::NAN).with_speed(f64::NAN),
            fix_at(0.0, 0.001, 20.0).with_speed(-3.0),
            fix_at(0.0, 0.002, f64::INFINITY).with_speed(2.5),
        ];
        assert_eq!(max_speed(&coords), 2.5);
        // Non-finite altitudes read as 0: 0 -> 20 counts, 20 -> 0 does not
        assert_eq!(elevation_gain(&coords), 20.0);
    }

    #[test]
    fn test_history_totals() {
        let mut a = Ride::new("a", "u", None, 0);
        a.stats.distance = 12.5;
        a.stats.elevation_gain = 300.0;
        let mut b = Ride::new("b", "u", None, 0);
        b.stats.distance = 7.5;

        let totals = HistoryTotals::from_rides(&[a, b]);
        assert_eq!(totals.ride_count, 2);
        assert_eq!(totals.total_distance, 20.0);
        assert_eq!(totals.total_elevation, 300.0);
        assert_eq!(HistoryTotals::from_rides(&[]), HistoryTotals::default());
    }
}
