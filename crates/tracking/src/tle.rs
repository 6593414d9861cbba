//! TLE Source
//!
//! SGP4 propagation of a two-line element set, then TEME → Earth-fixed by
//! GMST and topocentric look angles for the station.

use crate::source::{PositionSource, SourceError};
use chrono::{DateTime, Utc};
use nalgebra::{Rotation3, Vector3};
use rotator_protocol::Position;
use solar_scan::Observer;
use std::f64::consts::TAU;

// WGS84
const EARTH_RADIUS_KM: f64 = 6378.137;
const EARTH_FLATTENING: f64 = 1.0 / 298.257223563;

pub struct TleSource {
    name: Option<String>,
    epoch: DateTime<Utc>,
    constants: sgp4::Constants,
    observer: Observer,
}

impl std::fmt::Debug for TleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TleSource")
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .field("observer", &self.observer)
            .finish_non_exhaustive()
    }
}

impl TleSource {
    pub fn from_lines(line1: &str, line2: &str, observer: Observer) -> Result<Self, SourceError> {
        Self::parse(None, line1, line2, observer)
    }

    /// Same as [`from_lines`](Self::from_lines) with an object name for logs.
    pub fn named(name: &str, line1: &str, line2: &str, observer: Observer) -> Result<Self, SourceError> {
        Self::parse(Some(name.to_string()), line1, line2, observer)
    }

    fn parse(name: Option<String>, line1: &str, line2: &str, observer: Observer) -> Result<Self, SourceError> {
        let elements = sgp4::Elements::from_tle(name.clone(), line1.trim().as_bytes(), line2.trim().as_bytes())
            .map_err(|e| SourceError::InvalidElements(format!("{:?}", e)))?;
        let constants = sgp4::Constants::from_elements(&elements)
            .map_err(|e| SourceError::InvalidElements(format!("{:?}", e)))?;

        Ok(Self {
            name,
            epoch: DateTime::<Utc>::from_naive_utc_and_offset(elements.datetime, Utc),
            constants,
            observer,
        })
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Satellite position in Earth-fixed coordinates, km
    pub(crate) fn position_ecef(&self, instant: DateTime<Utc>) -> Result<Vector3<f64>, SourceError> {
        let minutes = (instant - self.epoch).num_milliseconds() as f64 / 60_000.0;
        let prediction = self
            .constants
            .propagate(minutes)
            .map_err(|e| SourceError::Unavailable(format!("propagation failed: {:?}", e)))?;

        let teme = Vector3::new(
            prediction.position[0],
            prediction.position[1],
            prediction.position[2],
        );
        let to_earth_fixed = Rotation3::from_axis_angle(&Vector3::z_axis(), -gmst(instant));
        Ok(to_earth_fixed * teme)
    }

    /// Azimuth/elevation of the satellite from the station at `instant`
    pub fn look_angles_at(&self, instant: DateTime<Utc>) -> Result<Position, SourceError> {
        let range = self.position_ecef(instant)? - station_ecef(&self.observer);

        let lat = self.observer.latitude_deg.to_radians();
        let lon = self.observer.longitude_deg.to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        let east = -sin_lon * range.x + cos_lon * range.y;
        let north = -sin_lat * cos_lon * range.x - sin_lat * sin_lon * range.y + cos_lat * range.z;
        let up = cos_lat * cos_lon * range.x + cos_lat * sin_lon * range.y + sin_lat * range.z;

        Ok(Position {
            azimuth: east.atan2(north).to_degrees().rem_euclid(360.0),
            elevation: up.atan2(east.hypot(north)).to_degrees(),
        })
    }
}

impl PositionSource for TleSource {
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        self.look_angles_at(Utc::now())
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("TLE {name}"),
            None => format!("TLE epoch {}", self.epoch.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }
}

/// Greenwich mean sidereal time, radians in [0, 2π)
pub fn gmst(instant: DateTime<Utc>) -> f64 {
    let jd = instant.timestamp_millis() as f64 / 86_400_000.0 + 2440587.5;
    let t = (jd - 2451545.0) / 36525.0;

    let gmst_sec = 67310.54841
        + (876600.0 * 3600.0 + 8640184.812866) * t
        + 0.093104 * t * t
        - 6.2e-6 * t * t * t;

    (gmst_sec / 240.0).to_radians().rem_euclid(TAU)
}

/// Geodetic station → Earth-fixed, km
fn station_ecef(observer: &Observer) -> Vector3<f64> {
    let lat = observer.latitude_deg.to_radians();
    let lon = observer.longitude_deg.to_radians();
    let alt_km = observer.altitude_m / 1000.0;

    let e2 = 2.0 * EARTH_FLATTENING - EARTH_FLATTENING * EARTH_FLATTENING;
    let n = EARTH_RADIUS_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();

    Vector3::new(
        (n + alt_km) * lat.cos() * lon.cos(),
        (n + alt_km) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + alt_km) * lat.sin(),
    )
}
