//! Engine tuning: CRS, stop-to-path distance limit and lock wait.

use std::time::Duration;

use crate::models::types::{Result, TopologyError};
use crate::spatial::geometry::Crs;

/// Maximum distance, in CRS units, between a stop and the path of a line
/// serving it.
pub const DEFAULT_MAX_DISTANCE: f64 = 25.0;

/// How long an operation waits for conflicting work before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub crs: Crs,
    pub max_distance: f64,
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crs: Crs::default(),
            max_distance: DEFAULT_MAX_DISTANCE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl EngineConfig {
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_distance.is_finite() || self.max_distance < 0.0 {
            return Err(TopologyError::InvalidArgument(format!(
                "max_distance must be a non-negative finite number, got {}",
                self.max_distance
            )));
        }
        Ok(())
    }
}
