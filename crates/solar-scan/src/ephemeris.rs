//! Solar Ephemeris
//!
//! Low-precision sun position (Astronomical Almanac style, ~0.01° over a few
//! decades around J2000). Good enough to center a scan on the sun.

use crate::{fold_azimuth, round4, Position};
use chrono::{DateTime, Utc};

/// J2000.0 epoch (2000-01-01T12:00:00Z) as unix milliseconds
const J2000_UNIX_MS: i64 = 946_728_000_000;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Fractional days since J2000.0
pub fn days_since_j2000(instant: DateTime<Utc>) -> f64 {
    (instant.timestamp_millis() - J2000_UNIX_MS) as f64 / MS_PER_DAY
}

/// Sun equatorial coordinates, radians
#[derive(Debug, Clone, Copy)]
pub struct SolarCoordinates {
    pub right_ascension: f64,
    pub declination: f64,
}

impl SolarCoordinates {
    /// Apparent right ascension/declination `d` days after J2000.0
    pub fn at_day(d: f64) -> Self {
        // Mean anomaly and mean longitude
        let g = (357.529 + 0.98560028 * d).to_radians();
        let q = 280.459 + 0.98564736 * d;

        // Ecliptic longitude and obliquity
        let lambda = (q + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
        let epsilon = (23.439 - 0.00000036 * d).to_radians();

        Self {
            right_ascension: (epsilon.cos() * lambda.sin()).atan2(lambda.cos()),
            declination: (epsilon.sin() * lambda.sin()).asin(),
        }
    }
}

/// Local sidereal time in radians for `d` days after J2000.0
fn local_sidereal_time(d: f64, longitude_deg: f64) -> f64 {
    let gmst_hours = (18.697374558 + 24.06570982441908 * d).rem_euclid(24.0);
    (gmst_hours * 15.0 + longitude_deg).to_radians()
}

/// Sun azimuth/elevation for an observer at `instant`.
///
/// Azimuth is measured from north through east and folded into [0, 360);
/// elevation is negative below the horizon. Both are rounded to 1e-4 degree.
pub fn sun_position(latitude_deg: f64, longitude_deg: f64, instant: DateTime<Utc>) -> Position {
    let d = days_since_j2000(instant);
    let sun = SolarCoordinates::at_day(d);

    let hour_angle = local_sidereal_time(d, longitude_deg) - sun.right_ascension;
    let lat = latitude_deg.to_radians();

    let elevation = (lat.sin() * sun.declination.sin()
        + lat.cos() * sun.declination.cos() * hour_angle.cos())
    .asin();
    let azimuth = (-hour_angle.sin())
        .atan2(lat.cos() * sun.declination.tan() - lat.sin() * hour_angle.cos());

    Position {
        azimuth: fold_azimuth(azimuth.to_degrees()),
        elevation: round4(elevation.to_degrees()),
    }
}
