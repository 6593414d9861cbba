//! Track Files
//!
//! Pre-computed pointing tables, one `time<TAB>azimuth<TAB>elevation` line
//! per point. The time column is carried as a label; points are followed in
//! file order, each one converged on before the next is sampled.

use crate::source::{PositionSource, SourceError};
use rotator_protocol::Position;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub time: String,
    pub target: Position,
}

#[derive(Debug, Clone)]
pub struct TrackFileSource {
    name: String,
    points: Vec<TrackPoint>,
    next: usize,
}

impl TrackFileSource {
    /// Load a track file. An unreadable file is `Unavailable`, a bad line
    /// is `InvalidTrack`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Unavailable(format!("reading {}: {}", path.display(), e)))?;

        let source = Self::parse(&path.display().to_string(), &text)?;
        info!("Loaded {} track points from {}", source.points.len(), path.display());
        Ok(source)
    }

    /// Parse track text; blank lines are skipped.
    pub fn parse(name: &str, text: &str) -> Result<Self, SourceError> {
        let mut points = Vec::new();

        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            points.push(parse_line(line).map_err(|reason| {
                SourceError::InvalidTrack(format!("{name} line {}: {reason}", index + 1))
            })?);
        }

        if points.is_empty() {
            return Err(SourceError::InvalidTrack(format!("{name}: no points")));
        }

        Ok(Self {
            name: name.to_string(),
            points,
            next: 0,
        })
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Points not yet handed out
    pub fn remaining(&self) -> usize {
        self.points.len() - self.next
    }
}

fn parse_line(line: &str) -> Result<TrackPoint, String> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    let [time, azimuth, elevation, ..] = fields[..] else {
        return Err(format!("expected time, azimuth, elevation separated by tabs, got {line:?}"));
    };

    let angle = |field: &str| match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("{field:?} is not an angle")),
    };

    Ok(TrackPoint {
        time: time.to_string(),
        target: Position::new(angle(azimuth)?, angle(elevation)?),
    })
}

impl PositionSource for TrackFileSource {
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        let point = self.points.get(self.next).ok_or(SourceError::Exhausted)?;
        self.next += 1;
        Ok(point.target)
    }

    fn describe(&self) -> String {
        format!("track {} ({} points)", self.name, self.points.len())
    }
}
