//! Run-level configuration for tracking.
//!
//! `TrackingParameters` decides when a tracker retires and what it retires as,
//! `TrackerModel` holds the motion-model constants every new tracker is built from.

use serde::{Deserialize, Serialize};

use crate::error::{KalmanQuantError, Result};

/// Lifecycle thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParameters {
    /// Consecutive misses tolerated; one more retires the tracker.
    pub max_misses: usize,
    /// Minimum number of claimed centroids for a retired tracker to count as a feature.
    pub min_size: usize,
}

impl Default for TrackingParameters {
    fn default() -> Self {
        Self {
            max_misses: 2,
            min_size: 4,
        }
    }
}

impl TrackingParameters {
    pub fn new(max_misses: usize, min_size: usize) -> Self {
        Self { max_misses, min_size }
    }

    /// Short traces survive: single gaps are bridged, three points make a feature.
    pub fn permissive() -> Self {
        Self {
            max_misses: 3,
            min_size: 3,
        }
    }

    /// No gaps, and at least six points.
    pub fn strict() -> Self {
        Self {
            max_misses: 0,
            min_size: 6,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(KalmanQuantError::Configuration(
                "min_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Motion-model constants shared by every tracker of a run.
///
/// Built once, then copied into each tracker at spawn time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerModel {
    /// Process noise of the m/z axis (times the 2x2 identity).
    pub mz_process_noise: f64,
    /// Initial variance of the m/z velocity.
    pub mz_velocity_variance: f64,
    /// Initial variance of the intensity velocity.
    pub intensity_velocity_variance: f64,
}

impl Default for TrackerModel {
    fn default() -> Self {
        Self {
            mz_process_noise: 1e-4,
            mz_velocity_variance: 10.0,
            intensity_velocity_variance: 1e-3,
        }
    }
}

impl TrackerModel {
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("mz_process_noise", self.mz_process_noise),
            ("mz_velocity_variance", self.mz_velocity_variance),
            ("intensity_velocity_variance", self.intensity_velocity_variance),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(KalmanQuantError::Configuration(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
