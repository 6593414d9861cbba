//! Position Codec
//!
//! Parses console answers into typed values and measures how far the
//! rotator is from where it was told to go.

use crate::{Position, Result, RotatorError};

/// Parse a get_pos answer: `Azimuth: <float>` / `Elevation: <float>`.
///
/// The last whitespace-delimited token of the first line is the azimuth and
/// that of the second line the elevation. Line endings may be CRLF or LF.
/// `nan` and `inf` are rejected: no rotator can point there.
pub fn parse_position(payload: &str) -> Result<Position> {
    let mut lines = payload.lines();
    let (Some(az_line), Some(el_line)) = (lines.next(), lines.next()) else {
        return Err(RotatorError::MalformedResponse(format!(
            "expected two position lines, got {payload:?}"
        )));
    };

    Ok(Position {
        azimuth: trailing_number(az_line)?,
        elevation: trailing_number(el_line)?,
    })
}

fn trailing_number(line: &str) -> Result<f64> {
    let token = line
        .split_whitespace()
        .last()
        .ok_or_else(|| RotatorError::MalformedResponse("empty position line".to_string()))?;

    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(RotatorError::MalformedResponse(format!(
            "not a number: {token:?} in {line:?}"
        ))),
    }
}

/// Find `label:` anywhere in an answer and parse the token that follows it.
///
/// Handles both one-value-per-line answers (`Distance: 12.5`) and several
/// labels on one line (`Longitude: -169.99 Latitude: -84.99`).
pub fn labeled_value(payload: &str, label: &str) -> Result<f64> {
    let key = format!("{label}:");
    let start = payload
        .find(&key)
        .ok_or_else(|| RotatorError::MalformedResponse(format!("missing {key:?} in {payload:?}")))?;

    let token = payload[start + key.len()..]
        .split_whitespace()
        .next()
        .ok_or_else(|| RotatorError::MalformedResponse(format!("no value after {key:?}")))?;

    token
        .parse::<f64>()
        .map_err(|_| RotatorError::MalformedResponse(format!("{key} {token:?} is not a number")))
}

/// Signed azimuth difference `a - b` on the shortest way round, in [-180, 180).
pub fn azimuth_delta(a: f64, b: f64) -> f64 {
    (a - b + 180.0).rem_euclid(360.0) - 180.0
}

/// Convergence error between two pointings, in degrees.
///
/// Euclidean on the (azimuth, elevation) plane with the azimuth difference
/// taken on the shortest way round, so 359° and 1° are 2° apart and a
/// rotator reporting 370° for a 10° command has converged. This is a
/// convergence test, not a great-circle distance.
pub fn angular_error(a: Position, b: Position) -> f64 {
    let d_az = azimuth_delta(a.azimuth, b.azimuth);
    let d_el = a.elevation - b.elevation;
    (d_az * d_az + d_el * d_el).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crlf_payload() {
        let pos = parse_position("Azimuth: 120.0\r\nElevation: 30.0").unwrap();
        assert_eq!(pos, Position::new(120.0, 30.0));
    }

    #[test]
    fn test_parse_lf_payload_with_padding() {
        let pos = parse_position("Azimuth:   -12.500000\nElevation: 85.250000\n").unwrap();
        assert_eq!(pos, Position::new(-12.5, 85.25));
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_position("garbage").unwrap_err();
        assert!(matches!(err, RotatorError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_non_numeric_is_malformed() {
        let err = parse_position("Azimuth: north\r\nElevation: 30.0").unwrap_err();
        assert!(matches!(err, RotatorError::MalformedResponse(_)));

        let err = parse_position("Azimuth: 10\r\n").unwrap_err();
        assert!(matches!(err, RotatorError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_rejects_non_finite() {
        for payload in [
            "Azimuth: nan\r\nElevation: 30.0",
            "Azimuth: 120.0\r\nElevation: inf",
            "Azimuth: -infinity\nElevation: 0",
        ] {
            let err = parse_position(payload).unwrap_err();
            assert!(matches!(err, RotatorError::MalformedResponse(_)), "{payload:?}");
        }
    }

    #[test]
    fn test_labeled_value() {
        let payload = "Longitude: -169.999983 Latitude: -84.999991";
        assert!((labeled_value(payload, "Longitude").unwrap() + 169.999983).abs() < 1e-9);
        assert!((labeled_value(payload, "Latitude").unwrap() + 84.999991).abs() < 1e-9);

        let qrb = "Distance: 11039.2\nAzimuth: 225.1";
        assert_eq!(labeled_value(qrb, "Distance").unwrap(), 11039.2);
        assert!(labeled_value(qrb, "Elevation").is_err());
    }

    #[test]
    fn test_azimuth_wraparound_is_shortest_way() {
        assert_eq!(angular_error(Position::new(359.0, 10.0), Position::new(1.0, 10.0)), 2.0);
        assert_eq!(angular_error(Position::new(370.0, 10.0), Position::new(10.0, 10.0)), 0.0);
        assert_eq!(angular_error(Position::new(-170.0, 0.0), Position::new(170.0, 0.0)), 20.0);
        assert_eq!(azimuth_delta(10.0, 350.0), 20.0);
        assert_eq!(azimuth_delta(350.0, 10.0), -20.0);
    }

    #[test]
    fn test_angular_error_is_euclidean() {
        let err = angular_error(Position::new(121.0, 31.0), Position::new(120.0, 30.0));
        assert!((err - 2f64.sqrt()).abs() < 1e-12);

        let err = angular_error(Position::new(0.0, 0.0), Position::new(3.0, 4.0));
        assert!((err - 5.0).abs() < 1e-12);
    }
}
