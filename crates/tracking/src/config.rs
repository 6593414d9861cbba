//! Tracking configuration
//!
//! Durations are stored as milliseconds so the structs read and write as
//! plain JSON numbers.

use crate::TrackingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Angular error (degrees) under which the rotator counts as on target
    pub tolerance_deg: f64,
    /// Delay between get_pos polls while converging
    pub poll_interval_ms: u64,
    /// Hold after convergence before the target is sampled again
    pub dwell_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: 1.0,
            poll_interval_ms: 500,
            dwell_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl TrackingConfig {
    pub fn with_tolerance(mut self, tolerance_deg: f64) -> Self {
        self.tolerance_deg = tolerance_deg;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if !(self.tolerance_deg.is_finite() && self.tolerance_deg > 0.0) {
            return Err(TrackingError::InvalidConfig(format!(
                "tolerance_deg must be positive, got {}",
                self.tolerance_deg
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(TrackingError::InvalidConfig(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.retry.abandon_after == Some(0) || self.retry.max_command_failures == Some(0) {
            return Err(TrackingError::InvalidConfig(
                "failure limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the session reacts to repeated failures.
///
/// Counters are consecutive: any success resets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Source failures before a degraded-tracking warning
    pub degraded_after: u32,
    /// Source failures before the session is abandoned; `None` retries forever
    pub abandon_after: Option<u32>,
    /// Added to the poll interval after a source failure
    pub backoff_ms: u64,
    /// Non-fatal command failures before the device is declared unresponsive
    pub max_command_failures: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            degraded_after: 3,
            abandon_after: Some(10),
            backoff_ms: 1000,
            max_command_failures: Some(5),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
