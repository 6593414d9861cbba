//! Solar Scan
//!
//! Pointing targets for when no live satellite is available:
//! - Observer-relative sun azimuth/elevation from a low-precision ephemeris
//! - Snake (boustrophedon) raster of offsets around a center for systematic sweeps

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod ephemeris;
pub mod snake;

pub use ephemeris::{days_since_j2000, sun_position, SolarCoordinates};
pub use snake::{snake_path, ScanPath, ScanPattern, MAX_SCAN_POINTS};

// Pointing type shared with the rotator protocol
pub use rotator_protocol::Position;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Scan step must be positive and finite, got {0}")]
    InvalidStep(f64),
    #[error("Scan span must be non-negative and finite, got {0}")]
    InvalidSpan(f64),
    #[error("Scan of {requested} points exceeds the limit of {limit}")]
    TooManyPoints { requested: f64, limit: usize },
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Round to 1e-4 degree, the resolution scan targets are handed out at
pub(crate) fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Azimuth in [0, 360) at 1e-4 degree
pub(crate) fn fold_azimuth(azimuth: f64) -> f64 {
    let folded = round4(azimuth.rem_euclid(360.0));
    if folded >= 360.0 {
        0.0
    } else {
        folded
    }
}

/// Ground station location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Observer {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    /// Sun position seen from here at `instant`
    pub fn sun_at(&self, instant: chrono::DateTime<chrono::Utc>) -> Position {
        sun_position(self.latitude_deg, self.longitude_deg, instant)
    }
}
