//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! wants to change.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FenceError, FenceResult, ValidationError};
use crate::region::DEFAULT_RADIUS_M;

/// Engine and runtime settings. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Radius applied to regions created through [`FenceEngine::region`](crate::FenceEngine::region).
    pub default_radius_m: f64,
    /// Number of single-writer shard workers in the runtime.
    pub shard_workers: usize,
    /// Per-shard queue capacity for location samples and region changes.
    pub sample_queue_capacity: usize,
    /// Queue capacity for change-feed batches.
    pub feed_queue_capacity: usize,
    /// Capacity of the fire-and-forget delivery queue built by
    /// [`FenceEngine::with_delivery_queue`](crate::FenceEngine::with_delivery_queue).
    pub delivery_queue_capacity: usize,
    /// Capacity of the runtime status stream.
    pub status_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_radius_m: DEFAULT_RADIUS_M,
            shard_workers: 2,
            sample_queue_capacity: 4096,
            feed_queue_capacity: 1024,
            delivery_queue_capacity: 1024,
            status_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON config and validates it.
    pub fn from_json_str(json: &str) -> FenceResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| FenceError::Config {
            message: format!("invalid engine config: {e}"),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> FenceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FenceError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for a non-positive radius or
    /// any zero worker count / capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidConfig { reason };

        if !self.default_radius_m.is_finite() || self.default_radius_m <= 0.0 {
            return Err(invalid(format!(
                "default_radius_m must be a finite value > 0, got {}",
                self.default_radius_m
            )));
        }

        let counts = [
            ("shard_workers", self.shard_workers),
            ("sample_queue_capacity", self.sample_queue_capacity),
            ("feed_queue_capacity", self.feed_queue_capacity),
            ("delivery_queue_capacity", self.delivery_queue_capacity),
            ("status_capacity", self.status_capacity),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(invalid(format!("{name} must be at least 1")));
            }
        }
        Ok(())
    }
}
