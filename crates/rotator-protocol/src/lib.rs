//! Rotator Protocol
//!
//! Command/response plumbing for azimuth/elevation rotators driven through a
//! line-oriented console (hamlib `rotctl` interactive mode and compatibles):
//! - Command framing and serialization
//! - Prompt-delimited response capture with deadlines
//! - Position payload parsing and convergence error
//! - In-memory mock rotator for tests and dry runs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub mod channel;
pub mod codec;
pub mod command;
pub mod mock;
pub mod transport;

// Re-exports
pub use channel::{CommandChannel, DEFAULT_COMMAND_TIMEOUT};
pub use codec::{angular_error, azimuth_delta, labeled_value, parse_position};
pub use command::{Command, Direction, Hemisphere};
pub use mock::{MockHandle, MockTransport};
pub use transport::{DeviceTransport, ProcessTransport, StreamTransport, ROTCTL_PROMPT};

#[derive(Error, Debug)]
pub enum RotatorError {
    #[error("No prompt within {timeout:?} after `{command}`")]
    Timeout { command: String, timeout: Duration },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Transport closed")]
    TransportClosed,
    #[error("Rotator rejected `{command}`: {reason}")]
    Rejected { command: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RotatorError {
    /// Sort raw I/O failures into a lost connection or a plain I/O error.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => RotatorError::TransportClosed,
            _ => RotatorError::Io(err),
        }
    }

    /// Errors after which the connection is not worth another command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RotatorError::TransportClosed | RotatorError::MalformedResponse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RotatorError>;

/// Rotator pointing in degrees.
///
/// Azimuth is nominally -180..540 and elevation -20..210 depending on the
/// rotator; no wraparound is applied here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub azimuth: f64,
    pub elevation: f64,
}

impl Position {
    pub const fn new(azimuth: f64, elevation: f64) -> Self {
        Self {
            azimuth,
            elevation,
        }
    }

    /// Same pointing with azimuth folded into [0, 360)
    pub fn normalized(&self) -> Self {
        Self {
            azimuth: self.azimuth.rem_euclid(360.0),
            elevation: self.elevation,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Az={:.2}° El={:.2}°", self.azimuth, self.elevation)
    }
}
