//! Rotator Commands
//!
//! Every operation the console understands, serialized to one ASCII line.
//!
//! | Verb | Operation | Arguments |
//! |------|-----------|-----------|
//! | `P` | set_pos | azimuth, elevation |
//! | `p` | get_pos | |
//! | `M` | move | direction, speed |
//! | `S` | stop | |
//! | `K` | park | |
//! | `_` | get_info | |
//! | `q` | exit | |
//! | `L` / `l` | lonlat2loc / loc2lonlat | |
//! | `D` / `d` | dms2dec / dec2dms | |
//! | `E` / `e` | dmmm2dec / dec2dmmm | |
//! | `B` | qrb | lon1, lat1, lon2, lat2 |
//! | `A` / `a` | a_sp2a_lp / d_sp2d_lp | |
//! | `pause` | pause | seconds |

use crate::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction argument of the move command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    /// Counter-clockwise
    Left,
    /// Clockwise
    Right,
}

impl Direction {
    pub fn code(&self) -> u8 {
        match self {
            Self::Up => 2,
            Self::Down => 4,
            Self::Left => 8,
            Self::Right => 16,
        }
    }
}

/// S/W flag of the DMS conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hemisphere {
    NorthEast,
    SouthWest,
}

impl Hemisphere {
    pub fn flag(&self) -> u8 {
        match self {
            Self::NorthEast => 0,
            Self::SouthWest => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    SetPosition(Position),
    GetPosition,
    /// Speed is 1..=100, or -1 to keep the current speed
    Move { direction: Direction, speed: i32 },
    Stop,
    Park,
    Info,
    Exit,
    LonLatToLocator { longitude: f64, latitude: f64, locator_len: u8 },
    LocatorToLonLat(String),
    DmsToDecimal { degrees: i32, minutes: i32, seconds: f64, hemisphere: Hemisphere },
    DecimalToDms(f64),
    DmmToDecimal { degrees: i32, minutes: f64, hemisphere: Hemisphere },
    DecimalToDmm(f64),
    Qrb { lon1: f64, lat1: f64, lon2: f64, lat2: f64 },
    ShortToLongPathDeg(f64),
    ShortToLongPathKm(f64),
    Pause(u32),
}

impl Command {
    /// Console verb
    pub fn verb(&self) -> &'static str {
        match self {
            Self::SetPosition(_) => "P",
            Self::GetPosition => "p",
            Self::Move { .. } => "M",
            Self::Stop => "S",
            Self::Park => "K",
            Self::Info => "_",
            Self::Exit => "q",
            Self::LonLatToLocator { .. } => "L",
            Self::LocatorToLonLat(_) => "l",
            Self::DmsToDecimal { .. } => "D",
            Self::DecimalToDms(_) => "d",
            Self::DmmToDecimal { .. } => "E",
            Self::DecimalToDmm(_) => "e",
            Self::Qrb { .. } => "B",
            Self::ShortToLongPathDeg(_) => "A",
            Self::ShortToLongPathKm(_) => "a",
            Self::Pause(_) => "pause",
        }
    }

    /// Serialize to a single line, without the terminator.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value, so a position read from the rotator is re-sent unchanged.
    pub fn to_line(&self) -> String {
        let verb = self.verb();
        match self {
            Self::SetPosition(p) => format!("{verb} {} {}", p.azimuth, p.elevation),
            Self::Move { direction, speed } => format!("{verb} {} {speed}", direction.code()),
            Self::LonLatToLocator {
                longitude,
                latitude,
                locator_len,
            } => format!("{verb} {longitude} {latitude} {locator_len}"),
            Self::LocatorToLonLat(locator) => format!("{verb} {locator}"),
            Self::DmsToDecimal {
                degrees,
                minutes,
                seconds,
                hemisphere,
            } => format!("{verb} {degrees} {minutes} {seconds} {}", hemisphere.flag()),
            Self::DmmToDecimal {
                degrees,
                minutes,
                hemisphere,
            } => format!("{verb} {degrees} {minutes} {}", hemisphere.flag()),
            Self::DecimalToDms(value)
            | Self::DecimalToDmm(value)
            | Self::ShortToLongPathDeg(value)
            | Self::ShortToLongPathKm(value) => format!("{verb} {value}"),
            Self::Qrb {
                lon1,
                lat1,
                lon2,
                lat2,
            } => format!("{verb} {lon1} {lat1} {lon2} {lat2}"),
            Self::Pause(seconds) => format!("{verb} {seconds}"),
            Self::GetPosition | Self::Stop | Self::Park | Self::Info | Self::Exit => {
                verb.to_string()
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}
