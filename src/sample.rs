//! Location samples delivered by the external location provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::geo::GeoPoint;
use crate::ids::SubjectId;

/// One location fix for a monitored subject.
///
/// `point` is optional because providers do emit fixes without a
/// coordinate; such samples are malformed and get dropped by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Subject the fix belongs to.
    pub subject: SubjectId,
    /// Reported coordinate, if any.
    #[serde(default)]
    pub point: Option<GeoPoint>,
    /// When the provider captured the fix.
    pub captured_at: DateTime<Utc>,
    /// Horizontal accuracy radius in meters, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl LocationSample {
    /// A sample captured now.
    #[must_use]
    pub fn now(subject: impl Into<SubjectId>, point: GeoPoint) -> Self {
        Self::at(subject, point, Utc::now())
    }

    /// A sample captured at `captured_at`.
    #[must_use]
    pub fn at(subject: impl Into<SubjectId>, point: GeoPoint, captured_at: DateTime<Utc>) -> Self {
        Self {
            subject: subject.into(),
            point: Some(point),
            captured_at,
            accuracy_m: None,
        }
    }

    /// A sample without a coordinate.
    #[must_use]
    pub fn missing_point(subject: impl Into<SubjectId>, captured_at: DateTime<Utc>) -> Self {
        Self {
            subject: subject.into(),
            point: None,
            captured_at,
            accuracy_m: None,
        }
    }

    /// Sets the reported accuracy radius.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// Returns the coordinate or the reason the sample cannot be evaluated.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::MalformedSample` for a blank subject, a
    /// missing point, or a negative / non-finite accuracy.
    pub fn checked_point(&self) -> Result<GeoPoint, ExecutionError> {
        let malformed = |reason: &str| ExecutionError::MalformedSample {
            subject: self.subject.to_string(),
            reason: reason.to_string(),
        };

        if self.subject.is_blank() {
            return Err(malformed("subject is empty"));
        }
        if let Some(acc) = self.accuracy_m {
            if !acc.is_finite() || acc < 0.0 {
                return Err(malformed("accuracy must be a finite value >= 0"));
            }
        }
        self.point.ok_or_else(|| malformed("sample has no coordinate"))
    }
}
