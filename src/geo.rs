//! Coordinates and great-circle distance.
//!
//! Distances use the haversine formula on a spherical earth. At the scales a
//! geofence cares about (tens to hundreds of meters) the error against a full
//! geodesic is well under half a percent.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A validated WGS84 coordinate.
///
/// # Examples
///
/// ```
/// use fencewatch::GeoPoint;
///
/// let p = GeoPoint::new(48.8584, 2.2945).unwrap();
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// assert_eq!(p.latitude(), 48.8584);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint", into = "RawPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawPoint {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawPoint> for GeoPoint {
    type Error = ValidationError;

    fn try_from(raw: RawPoint) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lng)
    }
}

impl From<GeoPoint> for RawPoint {
    fn from(p: GeoPoint) -> Self {
        Self {
            lat: p.latitude,
            lng: p.longitude,
        }
    }
}

impl GeoPoint {
    /// Creates a point, rejecting non-finite or out-of-range coordinates.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCoordinate` if latitude is outside
    /// [-90, 90] or longitude is outside [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
        let lng_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
        if !(lat_ok && lng_ok) {
            return Err(ValidationError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Degrees north, in `[-90, 90]`.
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Degrees east, in `[-180, 180]`.
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        distance_meters(*self, *other)
    }

    /// Returns the point reached by travelling `meters` due north.
    ///
    /// Latitude saturates at the pole. Mostly useful for building fixtures
    /// at a known distance from a region center.
    #[must_use]
    pub fn offset_north(&self, meters: f64) -> GeoPoint {
        let dlat = (meters / EARTH_RADIUS_M).to_degrees();
        GeoPoint {
            latitude: (self.latitude + dlat).clamp(-90.0, 90.0),
            longitude: self.longitude,
        }
    }
}

/// Haversine distance between two validated points, in meters.
#[must_use]
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Checked distance between two raw coordinate pairs.
///
/// # Errors
///
/// Returns `ValidationError::InvalidCoordinate` for either invalid pair.
pub fn distance_between(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<f64, ValidationError> {
    let a = GeoPoint::new(lat1, lon1)?;
    let b = GeoPoint::new(lat2, lon2)?;
    Ok(distance_meters(a, b))
}
