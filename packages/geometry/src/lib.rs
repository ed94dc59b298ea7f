#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry primitives for circular geofences.
//!
//! Provides a validated WGS84 [`Coordinates`] type, great-circle distance
//! via the haversine formula, and a bounding-rectangle envelope for a
//! circle so that callers can cheaply reject far-away points before doing
//! the exact distance check.

use geo::{Intersects, Point, Rect, coord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters used by [`distance_meters`].
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Meters spanned by one degree of latitude on the sphere used by
/// [`distance_meters`].
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;

/// Errors produced when validating raw coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    /// Latitude outside `-90..=90` (or not finite).
    #[error("latitude {0} out of range (-90..=90)")]
    Latitude(f64),

    /// Longitude outside `-180..=180` (or not finite).
    #[error("longitude {0} out of range (-180..=180)")]
    Longitude(f64),
}

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
}

impl Coordinates {
    /// Creates coordinates after range-checking both components.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if either component is out of range or
    /// not finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        let coords = Self { lat, lng };
        coords.validate()?;
        Ok(coords)
    }

    /// Checks that both components are within WGS84 bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] naming the first offending component.
    pub fn validate(&self) -> Result<(), CoordinateError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoordinateError::Latitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoordinateError::Longitude(self.lng));
        }
        Ok(())
    }

    /// Returns the point displaced `meters` due north (negative for south).
    ///
    /// Used mostly to build fixtures at a known distance from a center.
    #[must_use]
    pub fn offset_north(self, meters: f64) -> Self {
        Self {
            lat: self.lat + meters / METERS_PER_DEGREE,
            lng: self.lng,
        }
    }
}

impl From<Coordinates> for Point<f64> {
    fn from(value: Coordinates) -> Self {
        Self::new(value.lng, value.lat)
    }
}

/// Great-circle distance between two coordinates in meters.
///
/// Uses the haversine formula on a sphere of radius
/// [`EARTH_RADIUS_METERS`]. Symmetric, and zero for identical inputs.
/// Callers must validate coordinates first.
#[must_use]
pub fn distance_meters(a: Coordinates, b: Coordinates) -> f64 {
    let a: Point<f64> = a.into();
    let b: Point<f64> = b.into();

    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let dlat = (b.y() - a.y()).to_radians();
    let dlng = (b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push `h` a hair above 1 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_METERS * c
}

/// Axis-aligned envelope (lng/lat degrees) containing a circle.
///
/// Returns `None` when the envelope would cross a pole or the
/// antimeridian; callers then fall back to the exact distance test.
#[must_use]
pub fn circle_bounds(center: Coordinates, radius_meters: f64) -> Option<Rect<f64>> {
    let dlat = radius_meters / METERS_PER_DEGREE;
    let min_lat = center.lat - dlat;
    let max_lat = center.lat + dlat;
    if min_lat < -90.0 || max_lat > 90.0 {
        return None;
    }

    // Longitude degrees shrink with latitude; widen using the latitude
    // closest to a pole to stay conservative.
    let widest = min_lat.abs().max(max_lat.abs()).to_radians().cos();
    if widest <= f64::EPSILON {
        return None;
    }
    let dlng = dlat / widest;
    let min_lng = center.lng - dlng;
    let max_lng = center.lng + dlng;
    if min_lng < -180.0 || max_lng > 180.0 {
        return None;
    }

    Some(Rect::new(
        coord! { x: min_lng, y: min_lat },
        coord! { x: max_lng, y: max_lat },
    ))
}

/// Whether `point` lies within `radius_meters` of `center` (inclusive).
///
/// Rejects points outside the circle's envelope before computing the
/// haversine distance.
#[must_use]
pub fn within_radius(point: Coordinates, center: Coordinates, radius_meters: f64) -> bool {
    if let Some(bounds) = circle_bounds(center, radius_meters) {
        let p: Point<f64> = point.into();
        if !bounds.intersects(&p) {
            return false;
        }
    }
    distance_meters(point, center) <= radius_meters
}
