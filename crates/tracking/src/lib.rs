//! Rotator Tracking
//!
//! Closed-loop pointing of an az/el rotator at a moving target:
//! - Pluggable position sources (fixed, closure, sun, scan path, TLE, track file)
//! - Cancellable background session: set target, poll until converged, repeat
//! - Idle/Tracking state machine with non-blocking stop
//! - Broadcast telemetry events for any number of observers

use thiserror::Error;

pub mod config;
pub mod events;
mod session;
pub mod source;
pub mod tle;
pub mod track_file;
pub mod tracker;

pub use config::{RetryPolicy, TrackingConfig};
pub use events::{EndReason, TrackingEvent};
pub use source::{from_fn, FixedSource, FnSource, PositionSource, ScanSource, SourceError, SunSource};
pub use tle::TleSource;
pub use track_file::{TrackFileSource, TrackPoint};
pub use tracker::{Tracker, TrackingState};

pub use uuid::Uuid as SessionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("A tracking session is already running")]
    AlreadyTracking,
    #[error("No tracking session is running")]
    NotTracking,
    #[error("Invalid tracking configuration: {0}")]
    InvalidConfig(String),
}
