//! Display units and formatting.
//!
//! Stored values are always metric (km, m, m/s for max speed, km/h for average
//! speed). Conversion happens only at display time.

use serde::{Deserialize, Serialize};

use crate::achievements::{AchievementProgress, RequirementKind};

const MILES_PER_KM: f64 = 0.621371;
const FEET_PER_METER: f64 = 3.28084;
const KMH_PER_MPS: f64 = 3.6;
const MPH_PER_MPS: f64 = 2.23694;

/// Unit system used for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    /// Kilometers to km or miles.
    pub fn convert_distance(self, km: f64) -> f64 {
        match self {
            Units::Metric => km,
            Units::Imperial => km * MILES_PER_KM,
        }
    }

    /// km/h to km/h or mph.
    pub fn convert_speed_kmh(self, kmh: f64) -> f64 {
        match self {
            Units::Metric => kmh,
            Units::Imperial => kmh * MILES_PER_KM,
        }
    }

    /// m/s to km/h or mph.
    pub fn convert_speed_mps(self, mps: f64) -> f64 {
        match self {
            Units::Metric => mps * KMH_PER_MPS,
            Units::Imperial => mps * MPH_PER_MPS,
        }
    }

    /// Meters to m or feet.
    pub fn convert_elevation(self, meters: f64) -> f64 {
        match self {
            Units::Metric => meters,
            Units::Imperial => meters * FEET_PER_METER,
        }
    }

    pub fn distance_unit(self) -> &'static str {
        match self {
            Units::Metric => "km",
            Units::Imperial => "mi",
        }
    }

    pub fn speed_unit(self) -> &'static str {
        match self {
            Units::Metric => "km/h",
            Units::Imperial => "mph",
        }
    }

    pub fn elevation_unit(self) -> &'static str {
        match self {
            Units::Metric => "m",
            Units::Imperial => "ft",
        }
    }

    /// Progress line for an achievement, e.g. `"3/10 trails"` or
    /// `"12.5/160.9 km"`.
    pub fn format_progress(self, kind: RequirementKind, progress: &AchievementProgress) -> String {
        let (current, target) = (progress.current, progress.target);
        match kind {
            RequirementKind::Rides => format!("{:.0}/{:.0} rides", current, target),
            RequirementKind::Trails => format!("{:.0}/{:.0} trails", current, target),
            RequirementKind::Streak => format!("{:.0}/{:.0} days", current, target),
            RequirementKind::Distance => format!(
                "{:.1}/{:.1} {}",
                self.convert_distance(current),
                self.convert_distance(target),
                self.distance_unit()
            ),
            RequirementKind::Elevation => format!(
                "{:.0}/{:.0} {}",
                self.convert_elevation(current),
                self.convert_elevation(target),
                self.elevation_unit()
            ),
            RequirementKind::Speed => format!(
                "{:.1}/{:.1} {}",
                self.convert_speed_mps(current),
                self.convert_speed_mps(target),
                self.speed_unit()
            ),
        }
    }
}

/// Ride duration as `"1h 2m 3s"`, or `"2m 3s"` under an hour.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hrs, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hrs > 0 {
        format!("{}h {}m {}s", hrs, mins, secs)
    } else {
        format!("{}m {}s", mins, secs)
    }
}
