//! Position Sources
//!
//! Anything that can say where the rotator should point right now. The
//! tracking routine samples its source once per iteration and treats every
//! implementation the same way.

use chrono::Utc;
use rotator_protocol::Position;
use solar_scan::{Observer, ScanPath};
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Position source unavailable: {0}")]
    Unavailable(String),
    #[error("Position source exhausted")]
    Exhausted,
    #[error("Invalid orbital elements: {0}")]
    InvalidElements(String),
    #[error("Invalid track file: {0}")]
    InvalidTrack(String),
}

/// Supplier of the current target.
///
/// `Unavailable` is retried by the tracking routine; `Exhausted` ends the
/// session normally.
pub trait PositionSource: Send + 'static {
    fn current_target(&mut self) -> impl Future<Output = Result<Position, SourceError>> + Send;

    /// Short label for logs
    fn describe(&self) -> String {
        "position source".to_string()
    }
}

/// Constant target
#[derive(Debug, Clone, Copy)]
pub struct FixedSource(pub Position);

impl PositionSource for FixedSource {
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        format!("fixed {}", self.0)
    }
}

/// Target computed by a closure on every sample
pub struct FnSource<F> {
    f: F,
}

pub fn from_fn<F>(f: F) -> FnSource<F>
where
    F: FnMut() -> Result<Position, SourceError> + Send + 'static,
{
    FnSource { f }
}

impl<F> PositionSource for FnSource<F>
where
    F: FnMut() -> Result<Position, SourceError> + Send + 'static,
{
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        (self.f)()
    }

    fn describe(&self) -> String {
        "closure".to_string()
    }
}

/// Live sun position for a station
#[derive(Debug, Clone, Copy)]
pub struct SunSource {
    observer: Observer,
    min_elevation_deg: Option<f64>,
}

impl SunSource {
    pub fn new(observer: Observer) -> Self {
        Self {
            observer,
            min_elevation_deg: None,
        }
    }

    /// Report the sun as unavailable while it is below `degrees`.
    pub fn with_min_elevation(mut self, degrees: f64) -> Self {
        self.min_elevation_deg = Some(degrees);
        self
    }
}

impl PositionSource for SunSource {
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        let sun = self.observer.sun_at(Utc::now());
        match self.min_elevation_deg {
            Some(min) if sun.elevation < min => Err(SourceError::Unavailable(format!(
                "sun at {:.2}° elevation, below {min:.2}°",
                sun.elevation
            ))),
            _ => Ok(sun),
        }
    }

    fn describe(&self) -> String {
        format!(
            "sun from {:.5}, {:.5}",
            self.observer.latitude_deg, self.observer.longitude_deg
        )
    }
}

/// Walks a fixed list of points, one per tracking iteration
#[derive(Debug, Clone)]
pub struct ScanSource {
    points: Vec<Position>,
    next: usize,
}

impl ScanSource {
    pub fn new(path: &ScanPath) -> Self {
        Self::from_points(path.points().to_vec())
    }

    pub fn from_points(points: Vec<Position>) -> Self {
        Self { points, next: 0 }
    }

    /// Points not yet handed out
    pub fn remaining(&self) -> usize {
        self.points.len() - self.next
    }
}

impl PositionSource for ScanSource {
    async fn current_target(&mut self) -> Result<Position, SourceError> {
        let point = self.points.get(self.next).copied().ok_or(SourceError::Exhausted)?;
        self.next += 1;
        Ok(point)
    }

    fn describe(&self) -> String {
        format!("scan of {} points", self.points.len())
    }
}
