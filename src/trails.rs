//! Trail heads and proximity queries.
//!
//! Trail heads live in an R-tree keyed by (longitude, latitude). Radius queries
//! use the tree to pre-filter by a degree envelope, then confirm with the
//! haversine distance.

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_km, km_to_degrees};
use crate::GeoFix;

/// Trail head location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailHead {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl TrailHead {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude,
            longitude,
        }
    }

    /// Distance from a coordinate to this trail head in kilometers.
    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_km(latitude, longitude, self.latitude, self.longitude)
    }
}

impl RTreeObject for TrailHead {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.longitude, self.latitude])
    }
}

/// Spatial index over trail heads.
pub struct TrailIndex {
    tree: RTree<TrailHead>,
}

impl TrailIndex {
    pub fn new(trails: Vec<TrailHead>) -> Self {
        let trails: Vec<TrailHead> = trails
            .into_iter()
            .filter(|t| t.latitude.is_finite() && t.longitude.is_finite())
            .collect();
        Self {
            tree: RTree::bulk_load(trails),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn get(&self, trail_id: &str) -> Option<&TrailHead> {
        self.tree.iter().find(|t| t.id == trail_id)
    }

    /// All trail heads with their distance in km, nearest first.
    pub fn sorted_by_distance(&self, latitude: f64, longitude: f64) -> Vec<(&TrailHead, f64)> {
        let mut trails: Vec<(&TrailHead, f64)> = self
            .tree
            .iter()
            .map(|t| (t, t.distance_km(latitude, longitude)))
            .collect();
        trails.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        trails
    }

    /// Closest trail head within `radius_km`, if any.
    pub fn nearest_within(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Option<&TrailHead> {
        if !(radius_km > 0.0 && latitude.is_finite() && longitude.is_finite()) {
            return None;
        }

        let (lat_span, lon_span) = km_to_degrees(radius_km, latitude);
        let search_bounds = AABB::from_corners(
            [longitude - lon_span, latitude - lat_span],
            [longitude + lon_span, latitude + lat_span],
        );

        self.tree
            .locate_in_envelope_intersecting(&search_bounds)
            .map(|t| (t, t.distance_km(latitude, longitude)))
            .filter(|(_, d)| *d <= radius_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(t, _)| t)
    }

    /// Trail a ride was most likely recorded on: the trail head nearest to
    /// the first fix, within `radius_km`.
    pub fn infer_trail(&self, fixes: &[GeoFix], radius_km: f64) -> Option<&TrailHead> {
        let first = fixes.first()?;
        let trail = self.nearest_within(first.latitude, first.longitude, radius_km);
        if let Some(trail) = trail {
            log::debug!("[Trails] Inferred trail {} ({})", trail.id, trail.name);
        }
        trail
    }
}
