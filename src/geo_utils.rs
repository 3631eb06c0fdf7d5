//! Geographic utilities: great-circle distance, bounds and degree conversion.
//!
//! Every distance-derived value in the crate goes through [`haversine_km`], so
//! per-ride aggregation and trail proximity always agree on the geometry.

use geo::{BoundingRect, MultiPoint, Point};

use crate::{Bounds, GeoFix};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate length of one degree of latitude in kilometers.
const KM_PER_DEGREE: f64 = 111.32;

/// Great-circle distance between two coordinates in kilometers.
///
/// Uses the haversine formula. Out-of-range inputs are not validated and
/// yield a meaningless (but finite for finite input) distance.
///
/// # Example
/// ```
/// use ride_tracker::geo_utils::haversine_km;
///
/// let d = haversine_km(0.0, 0.0, 0.0, 1.0);
/// assert!((d - 111.19).abs() < 0.01);
/// ```
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between two fixes in kilometers.
pub fn fix_distance_km(a: &GeoFix, b: &GeoFix) -> f64 {
    haversine_km(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Convert a ground distance into a (latitude, longitude) degree span at the
/// given latitude. Used to size spatial-index envelopes; the longitude span
/// widens towards the poles.
pub fn km_to_degrees(km: f64, latitude: f64) -> (f64, f64) {
    let lat_span = km / KM_PER_DEGREE;
    let cos_lat = latitude.to_radians().cos().abs().max(1e-6);
    let lon_span = (km / (KM_PER_DEGREE * cos_lat)).min(360.0);
    (lat_span, lon_span)
}

/// Bounding box of a sequence of fixes, `None` when empty.
pub fn compute_bounds(fixes: &[GeoFix]) -> Option<Bounds> {
    let points: MultiPoint<f64> = fixes
        .iter()
        .filter(|f| f.latitude.is_finite() && f.longitude.is_finite())
        .map(|f| Point::new(f.longitude, f.latitude))
        .collect();

    points.bounding_rect().map(|rect| Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}
