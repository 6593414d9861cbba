//! Snake Scan
//!
//! Raster of pointing offsets around a center. Alternate elevation rows run
//! the azimuth offsets in opposite directions so the rotator never swings
//! back across the whole span between rows.
//!
//! ```text
//!  row 2  →  →  →  →
//!  row 1  ←  ←  ←  ←
//!  row 0  →  →  →  →     (elevation offsets ascending)
//! ```

use crate::{fold_azimuth, round4, Position, Result, ScanError};
use serde::{Deserialize, Serialize};

/// Largest raster [`ScanPattern::generate`] will lay out
pub const MAX_SCAN_POINTS: usize = 1_000_000;

/// Raster geometry; spans are full widths centered on the target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPattern {
    pub span_az_deg: f64,
    pub span_el_deg: f64,
    pub step_az_deg: f64,
    pub step_el_deg: f64,
}

impl ScanPattern {
    pub fn square(span_deg: f64, step_deg: f64) -> Self {
        Self {
            span_az_deg: span_deg,
            span_el_deg: span_deg,
            step_az_deg: step_deg,
            step_el_deg: step_deg,
        }
    }

    /// Lay the raster around one snapshot of `center`.
    ///
    /// Points are rounded to 1e-4 degree. Patterns over
    /// [`MAX_SCAN_POINTS`] points are refused before anything is allocated.
    pub fn generate(&self, center: Position) -> Result<ScanPath> {
        let columns = axis_len(self.span_az_deg, self.step_az_deg)?;
        let rows = axis_len(self.span_el_deg, self.step_el_deg)?;
        let total = columns
            .checked_mul(rows)
            .filter(|n| *n <= MAX_SCAN_POINTS)
            .ok_or(ScanError::TooManyPoints {
                requested: columns as f64 * rows as f64,
                limit: MAX_SCAN_POINTS,
            })?;

        let az_offsets = offsets(self.span_az_deg, self.step_az_deg, columns);
        let el_offsets = offsets(self.span_el_deg, self.step_el_deg, rows);

        let mut points = Vec::with_capacity(total);
        for (row, d_el) in el_offsets.iter().enumerate() {
            let mut push = |d_az: &f64| {
                points.push(Position {
                    azimuth: fold_azimuth(center.azimuth + d_az),
                    elevation: round4(center.elevation + d_el),
                });
            };

            if row % 2 == 0 {
                az_offsets.iter().for_each(&mut push);
            } else {
                az_offsets.iter().rev().for_each(&mut push);
            }
        }

        Ok(ScanPath {
            center,
            columns,
            rows,
            points,
        })
    }
}

/// Number of offsets on one axis, `floor(span/step) + 1`
fn axis_len(span: f64, step: f64) -> Result<usize> {
    if !(step.is_finite() && step > 0.0) {
        return Err(ScanError::InvalidStep(step));
    }
    if !(span.is_finite() && span >= 0.0) {
        return Err(ScanError::InvalidSpan(span));
    }

    let steps = (span / step).floor();
    if steps >= MAX_SCAN_POINTS as f64 {
        return Err(ScanError::TooManyPoints {
            requested: steps + 1.0,
            limit: MAX_SCAN_POINTS,
        });
    }
    Ok(steps as usize + 1)
}

/// `-span/2 + i*step` for `i` in `0..len`, rounded
fn offsets(span: f64, step: f64, len: usize) -> Vec<f64> {
    (0..len).map(|i| round4(-span / 2.0 + i as f64 * step)).collect()
}

/// Square snake scan of `span` degrees in `step` increments around `center`
pub fn snake_path(center: Position, span: f64, step: f64) -> Result<ScanPath> {
    ScanPattern::square(span, step).generate(center)
}

/// Ordered scan points, fixed once generated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPath {
    center: Position,
    columns: usize,
    rows: usize,
    points: Vec<Position>,
}

impl ScanPath {
    pub fn center(&self) -> Position {
        self.center
    }

    pub fn points(&self) -> &[Position] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<Position> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Azimuth steps per row
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Elevation rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Points of one elevation row, in traversal order
    pub fn row(&self, index: usize) -> Option<&[Position]> {
        let start = index.checked_mul(self.columns)?;
        self.points.get(start..start + self.columns)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Position> {
        self.points.iter()
    }
}

impl<'a> IntoIterator for &'a ScanPath {
    type Item = &'a Position;
    type IntoIter = std::slice::Iter<'a, Position>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
