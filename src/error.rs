//! Unified error handling for the ride-tracker library.
//!
//! Aggregation and evaluation are total functions and never fail; errors only
//! come from lifecycle misuse, persistence collaborators and configuration.

use thiserror::Error;

/// Unified error type for ride-tracker operations.
#[derive(Debug, Clone, Error)]
pub enum RideError {
    /// A lifecycle action was requested in a state that does not allow it
    #[error("Cannot {action} a ride while {from}")]
    InvalidTransition { from: String, action: String },

    /// Start was requested while another ride is recording or paused
    #[error("Ride '{ride_id}' is already active")]
    RideAlreadyActive { ride_id: String },

    /// An operation needed an active ride and there is none
    #[error("No active ride")]
    NoActiveRide,

    /// A store was asked about a ride it does not hold
    #[error("Ride '{ride_id}' not found")]
    RideNotFound { ride_id: String },

    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Remote collaborator could not be reached
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Blob encode/decode error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for ride-tracker operations.
pub type Result<T> = std::result::Result<T, RideError>;

impl From<serde_json::Error> for RideError {
    fn from(err: serde_json::Error) -> Self {
        RideError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for RideError {
    fn from(err: rusqlite::Error) -> Self {
        RideError::Persistence {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for RideError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RideError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for RideError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RideError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for converting Option to RideError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a ride-not-found error.
    fn ok_or_ride_not_found(self, ride_id: &str) -> Result<T>;

    /// Convert Option to Result with a no-active-ride error.
    fn ok_or_no_active_ride(self) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_ride_not_found(self, ride_id: &str) -> Result<T> {
        self.ok_or_else(|| RideError::RideNotFound {
            ride_id: ride_id.to_string(),
        })
    }

    fn ok_or_no_active_ride(self) -> Result<T> {
        self.ok_or(RideError::NoActiveRide)
    }
}
