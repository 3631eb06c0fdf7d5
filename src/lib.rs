//! # Ride Tracker
//!
//! Ride metrics and achievement evaluation for recreational trail riding.
//!
//! This library provides:
//! - Haversine distance and track bounds for raw GPS fixes
//! - A ride lifecycle recorder (start, pause, resume, stop) with non-blocking fix ingestion
//! - Ride statistics: distance, elevation gain, max/average speed, duration
//! - An achievement rule engine with a monotonic unlock ledger and streak tracking
//! - Two-tier ride persistence (remote collaborator with local fallback)
//! - Trail-head proximity queries and metric/imperial display formatting
//!
//! ## Features
//!
//! - **`persistence`** - SQLite storage for rides and the unlock ledger (default)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use ride_tracker::{GeoFix, RideRecorder};
//!
//! let mut recorder = RideRecorder::new();
//! recorder.start("ride-1", "user-1", None, 0).unwrap();
//!
//! let sensor = recorder.fix_sender();
//! sensor.send(GeoFix::new(0.0, 0.0, 1_000).with_altitude(100.0));
//! sensor.send(GeoFix::new(0.0, 0.01, 6_000).with_altitude(105.0));
//!
//! let ride = recorder.stop(1_800_000).unwrap();
//! assert_eq!(ride.stats.elevation_gain, 5.0);
//! println!("{:.2} km at {:.1} km/h", ride.stats.distance, ride.stats.avg_speed);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, RideError};

// Configuration
pub mod config;
pub use config::{LocationRequest, TrackerConfig};

// Geographic utilities (haversine distance, bounds)
pub mod geo_utils;

// Per-ride statistics
pub mod metrics;
pub use metrics::{compute_stats, HistoryTotals};

// Ride lifecycle state machine
pub mod recorder;
pub use recorder::{FixSender, RideRecorder, RideState};

// Consecutive-day streaks
pub mod streak;
pub use streak::current_streak;

// Unlock ledger
pub mod ledger;
pub use ledger::UnlockLedger;

// Achievement catalog and rule engine
pub mod achievements;
pub use achievements::{
    evaluate, Achievement, AchievementId, AchievementProgress, Evaluation, RequirementKind,
    CATALOG,
};

// Ride and ledger storage
pub mod persistence;
pub use persistence::{
    LedgerStore, LocalRideStore, LocalStore, MemoryStore, RideStore, RideUpdate, StorageTier,
    TieredRideStore,
};
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Trail heads and proximity queries
pub mod trails;
pub use trails::{TrailHead, TrailIndex};

// Display units and formatting
pub mod units;
pub use units::Units;

// Per-user session service
pub mod session;
pub use session::{CompletedRide, RideSession};

/// Initialize logging for Android hosts.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RideTrackerRust"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A single timestamped GPS sample.
///
/// # Example
/// ```
/// use ride_tracker::GeoFix;
/// let fix = GeoFix::new(37.8651, -119.5383, 1_700_000_000_000).with_speed(4.2);
/// assert_eq!(fix.altitude, 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since epoch
    pub timestamp: i64,
    /// m/s, 0 if unknown
    #[serde(default)]
    pub speed: f64,
    /// Meters, 0 if unavailable
    #[serde(default)]
    pub altitude: f64,
}

impl GeoFix {
    /// Create a fix with unknown speed and altitude.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            speed: 0.0,
            altitude: 0.0,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    /// Reported speed, with missing, negative or non-finite values read as 0.
    pub fn sanitized_speed(&self) -> f64 {
        if self.speed.is_finite() && self.speed > 0.0 {
            self.speed
        } else {
            0.0
        }
    }

    /// Reported altitude, with non-finite values read as 0.
    pub fn sanitized_altitude(&self) -> f64 {
        if self.altitude.is_finite() {
            self.altitude
        } else {
            0.0
        }
    }
}

/// Summary statistics of one ride. Always derived from the coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStats {
    /// Kilometers
    pub distance: f64,
    /// Seconds, wall clock from start to end
    pub duration: f64,
    /// Meters, positive altitude deltas only
    pub elevation_gain: f64,
    /// m/s
    pub max_speed: f64,
    /// km/h
    pub avg_speed: f64,
}

/// One recording session from Start to Stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trail_id: Option<String>,
    /// Milliseconds since epoch
    pub start_time: i64,
    /// Milliseconds since epoch, set once at Stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub stats: RideStats,
    /// Fixes in recording order
    #[serde(default)]
    pub coordinates: Vec<GeoFix>,
}

impl Ride {
    /// A fresh ride with no fixes and zeroed stats.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        trail_id: Option<String>,
        start_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            trail_id,
            start_time,
            end_time: None,
            stats: RideStats::default(),
            coordinates: Vec::new(),
        }
    }

    /// Whether the ride has been finalized.
    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Bounding box of the recorded track.
    pub fn bounds(&self) -> Option<Bounds> {
        geo_utils::compute_bounds(&self.coordinates)
    }
}

/// Bounding box of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Center of the bounds as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_values() {
        let fix = GeoFix::new(0.0, 0.0, 0)
            .with_speed(f64::NAN)
            .with_altitude(f64::NEG_INFINITY);
        assert_eq!(fix.sanitized_speed(), 0.0);
        assert_eq!(fix.sanitized_altitude(), 0.0);

        let fix = GeoFix::new(0.0, 0.0, 0).with_speed(-1.0).with_altitude(-12.0);
        assert_eq!(fix.sanitized_speed(), 0.0);
        assert_eq!(fix.sanitized_altitude(), -12.0);
    }

    #[test]
    fn test_fix_missing_fields_deserialize_as_zero() {
        let fix: GeoFix =
            serde_json::from_str(r#"{"latitude":1.0,"longitude":2.0,"timestamp":3}"#).unwrap();
        assert_eq!(fix.speed, 0.0);
        assert_eq!(fix.altitude, 0.0);
    }

    #[test]
    fn test_ride_json_shape() {
        let ride = Ride::new("r1", "u1", Some("3".to_string()), 1_000);
        let json = serde_json::to_value(&ride).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["trailId"], "3");
        assert_eq!(json["stats"]["elevationGain"], 0.0);
        assert!(json.get("endTime").is_none());
        assert!(!ride.is_completed());
    }

    #[test]
    fn test_ride_bounds_center() {
        let mut ride = Ride::new("r1", "u1", None, 0);
        assert!(ride.bounds().is_none());
        ride.coordinates = vec![GeoFix::new(10.0, 20.0, 0), GeoFix::new(12.0, 24.0, 1)];
        assert_eq!(ride.bounds().unwrap().center(), (11.0, 22.0));
    }
}
