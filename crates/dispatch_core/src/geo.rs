//! Geographic math: great-circle distances and bounding boxes.
//!
//! All distances are straight-line Haversine kilometers. Route distances and
//! road ETAs are out of scope; collaborators that need them bring their own
//! routing provider.

use crate::error::SearchError;

/// Mean Earth radius used by the Haversine formula (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometers.
///
/// Pure and deterministic. NaN inputs propagate; range validation happens
/// upstream via [`validate_coordinates`].
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1_rad, lat2_rad) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlng = (dlng * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1_rad.cos() * lat2_rad.cos() * sin_dlng * sin_dlng;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Axis-aligned lat/lng box, used as a cheap pre-filter before exact
/// point-in-polygon tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Tight box around a set of points. Returns `None` for an empty set.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (lat, lng) = iter.next()?;
        let mut bbox = BoundingBox {
            min_lat: lat,
            max_lat: lat,
            min_lng: lng,
            max_lng: lng,
        };
        for (lat, lng) in iter {
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
            bbox.min_lng = bbox.min_lng.min(lng);
            bbox.max_lng = bbox.max_lng.max(lng);
        }
        Some(bbox)
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Reject coordinates outside lat ∈ [-90, 90], lng ∈ [-180, 180] or non-finite.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), SearchError> {
    if !lat.is_finite() || !lng.is_finite() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(SearchError::InvalidCoordinates { lat, lng });
    }
    Ok(())
}

/// Reject search radii that are non-finite, non-positive, or implausibly large.
pub fn validate_radius_km(radius_km: f64) -> Result<(), SearchError> {
    if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > 100.0 {
        return Err(SearchError::InvalidRadius(radius_km));
    }
    Ok(())
}
