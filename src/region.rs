//! Restricted regions.
//!
//! A region is a circle a parent draws around a place their child should not
//! be. Regions are owned by the [`GeofenceRegistry`](crate::registry::GeofenceRegistry);
//! everything else works on cloned snapshots.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geo::{distance_meters, GeoPoint};
use crate::ids::{OwnerId, RegionId, SubjectId};

/// Radius used when a region is created without one.
pub const DEFAULT_RADIUS_M: f64 = 100.0;

/// A circular restricted area attached to one monitored subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Unique region id.
    pub id: RegionId,
    /// Parent who drew the region and receives its alerts.
    pub owner: OwnerId,
    /// Subject the region restricts.
    pub subject: SubjectId,
    /// Display name used in alert text.
    pub label: String,
    /// Street address resolved when the region was created, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Circle center.
    pub center: GeoPoint,
    /// Radius in meters. A point exactly on the boundary is inside.
    pub radius_m: f64,
}

impl Region {
    /// Creates a region with the default radius.
    #[must_use]
    pub fn new(
        id: impl Into<RegionId>,
        owner: impl Into<OwnerId>,
        subject: impl Into<SubjectId>,
        label: impl Into<String>,
        center: GeoPoint,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            subject: subject.into(),
            label: label.into(),
            address: None,
            center,
            radius_m: DEFAULT_RADIUS_M,
        }
    }

    /// Sets the radius in meters. Validity is checked by [`Region::validate`].
    #[must_use]
    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.radius_m = radius_m;
        self
    }

    /// Attaches the street address shown in alert text.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Checks the invariants the registry relies on.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRegion` for a blank id or subject, or
    /// a radius that is not a finite positive number.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidRegion {
            id: self.id.to_string(),
            reason: reason.to_string(),
        };

        if self.id.is_blank() {
            return Err(invalid("region id cannot be empty"));
        }
        if self.subject.is_blank() {
            return Err(invalid("subject cannot be empty"));
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(invalid(&format!(
                "radius must be a finite value > 0, got {}",
                self.radius_m
            )));
        }
        Ok(())
    }

    /// Distance from the region center to `point`, in meters.
    #[must_use]
    pub fn distance_from_center(&self, point: GeoPoint) -> f64 {
        distance_meters(self.center, point)
    }

    /// Inclusive containment: a point exactly on the boundary is inside.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        self.distance_from_center(point) <= self.radius_m
    }

    /// True if subject, center and radius all match. Label and address are ignored.
    #[must_use]
    pub fn same_geometry(&self, other: &Region) -> bool {
        self.center == other.center && self.radius_m == other.radius_m && self.subject == other.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0).unwrap()
    }

    #[test]
    fn new_region_uses_default_radius() {
        let r = Region::new("r1", "parent", "child", "Mall", origin());
        assert_eq!(r.radius_m, DEFAULT_RADIUS_M);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_radius() {
        for radius in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let r = Region::new("r1", "parent", "child", "Mall", origin()).with_radius(radius);
            assert!(
                matches!(r.validate(), Err(ValidationError::InvalidRegion { .. })),
                "radius {radius} should be rejected"
            );
        }
    }

    #[test]
    fn validate_rejects_blank_ids() {
        let r = Region::new("", "parent", "child", "Mall", origin());
        assert!(r.validate().is_err());
        let r = Region::new("r1", "parent", " ", "Mall", origin());
        assert!(r.validate().is_err());
    }

    #[test]
    fn boundary_is_inclusive() {
        let r = Region::new("r1", "parent", "child", "Mall", origin()).with_radius(100.0);
        let edge = origin().offset_north(100.0);
        let d = r.distance_from_center(edge);
        let exact = r.clone().with_radius(d);
        assert!(exact.contains(edge));
        assert!(!r.clone().with_radius(d - 1e-6).contains(edge));
    }

    #[test]
    fn same_geometry_ignores_label() {
        let a = Region::new("r1", "parent", "child", "Mall", origin());
        let b = a.clone().with_address("1 Main St");
        let mut c = a.clone();
        c.label = "Arcade".to_string();
        assert!(a.same_geometry(&b));
        assert!(a.same_geometry(&c));
        assert!(!a.same_geometry(&a.clone().with_radius(250.0)));
    }
}
