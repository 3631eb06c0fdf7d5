//! Tracker configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a valid
//! configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RideError};
use crate::units::Units;

/// Settings for location sampling, trail matching and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Requested interval between location fixes, handed to the sensing
    /// collaborator. Default: 5000 ms
    pub sampling_interval_ms: u64,

    /// Minimum movement between fixes, handed to the sensing collaborator.
    /// Default: 10 m
    pub distance_interval_m: f64,

    /// Maximum distance from a trail head for a ride to be attributed to it.
    /// Default: 1.0 km
    pub trail_radius_km: f64,

    /// Display units. Default: metric
    pub units: Units,

    /// Local ride database opened by [`LocalStore::open`](crate::LocalStore::open).
    /// `None` keeps the local tier in memory.
    pub database_path: Option<String>,
}

/// Sampling parameters for the location-sensing collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    pub interval: Duration,
    pub min_distance_m: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 5000,
            distance_interval_m: 10.0,
            trail_radius_km: 1.0,
            units: Units::Metric,
            database_path: None,
        }
    }
}

impl TrackerConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| RideError::Config {
            message: format!("invalid config JSON: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| RideError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config = Self::from_json(&json)?;
        log::info!("[Config] Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// What to ask of the location provider when a ride starts.
    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval: Duration::from_millis(self.sampling_interval_ms),
            min_distance_m: self.distance_interval_m,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sampling_interval_ms == 0 {
            return Err(config_error("sampling_interval_ms must be positive"));
        }
        if !(self.distance_interval_m > 0.0 && self.distance_interval_m.is_finite()) {
            return Err(config_error("distance_interval_m must be positive"));
        }
        if !(self.trail_radius_km > 0.0 && self.trail_radius_km.is_finite()) {
            return Err(config_error("trail_radius_km must be positive"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> RideError {
    RideError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.sampling_interval_ms, 5000);
        assert_eq!(config.distance_interval_m, 10.0);
        assert!(config.validate().is_ok());
        assert_eq!(TrackerConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn test_location_request() {
        let config = TrackerConfig::from_json(r#"{"sampling_interval_ms": 2500}"#).unwrap();
        let request = config.location_request();
        assert_eq!(request.interval, Duration::from_millis(2500));
        assert_eq!(request.min_distance_m, 10.0);
    }

    #[test]
    fn test_partial_json() {
        let config =
            TrackerConfig::from_json(r#"{"units": "imperial", "trail_radius_km": 0.5}"#).unwrap();
        assert_eq!(config.units, Units::Imperial);
        assert_eq!(config.trail_radius_km, 0.5);
        assert_eq!(config.sampling_interval_ms, 5000);
    }

    #[test]
    fn test_rejects_non_positive() {
        for json in [
            r#"{"sampling_interval_ms": 0}"#,
            r#"{"distance_interval_m": -1.0}"#,
            r#"{"trail_radius_km": 0.0}"#,
        ] {
            assert!(
                matches!(TrackerConfig::from_json(json), Err(RideError::Config { .. })),
                "{} should be rejected",
                json
            );
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            TrackerConfig::from_json("{units"),
            Err(RideError::Config { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(&path, r#"{"database_path": "rides.db"}"#).unwrap();

        let config = TrackerConfig::from_file(&path).unwrap();
        assert_eq!(config.database_path.as_deref(), Some("rides.db"));
        assert!(TrackerConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
