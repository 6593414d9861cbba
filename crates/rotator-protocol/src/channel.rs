//! Command Channel
//!
//! Strict request/response over a [`DeviceTransport`]: one line out, read
//! to the next prompt, strip the echo, hand back the payload. The transport
//! sits behind an async mutex so a UI polling get_pos and a tracking task
//! issuing set_pos never interleave on the wire.
//!
//! A command whose answer misses its deadline still owes one prompt. The
//! channel counts those and reads them off before the next command goes
//! out, so a late answer is never taken for the reply to a newer command.

use crate::codec::{labeled_value, parse_position};
use crate::command::{Command, Direction, Hemisphere};
use crate::transport::DeviceTransport;
use crate::{Position, Result, RotatorError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Deadline for one command, write and prompt together
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Marker hamlib prints when a command fails, e.g. `set_pos: error = Invalid parameter`
const ERROR_MARKER: &str = "error =";

struct Link<T> {
    transport: T,
    /// Prompts still due for commands that timed out after being written
    owed: usize,
}

pub struct CommandChannel<T> {
    link: Arc<Mutex<Link<T>>>,
    timeout: Duration,
}

impl<T> Clone for CommandChannel<T> {
    fn clone(&self) -> Self {
        Self {
            link: Arc::clone(&self.link),
            timeout: self.timeout,
        }
    }
}

impl<T: DeviceTransport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            link: Arc::new(Mutex::new(Link { transport, owed: 0 })),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one command and return its trimmed payload.
    ///
    /// Late answers to earlier timed-out commands are discarded first, within
    /// the same deadline. If they still have not arrived the command is not
    /// written and `Timeout` is returned.
    pub async fn send(&self, command: &Command) -> Result<String> {
        let line = command.to_line();
        let deadline = Instant::now() + self.timeout;
        let timed_out = || RotatorError::Timeout {
            command: line.clone(),
            timeout: self.timeout,
        };

        let raw = {
            let mut guard = self.link.lock().await;
            let link = &mut *guard;

            while link.owed > 0 {
                let stale = timeout_at(deadline, link.transport.read_until_prompt())
                    .await
                    .map_err(|_| timed_out())?;
                match stale {
                    Ok(stale) => {
                        link.owed -= 1;
                        debug!(stale = %stale.trim(), "Discarded late answer");
                    }
                    Err(e) => {
                        link.owed = 0;
                        return Err(e);
                    }
                }
            }

            debug!(command = %line, "-> rotator");
            timeout_at(deadline, link.transport.write_line(&line))
                .await
                .map_err(|_| timed_out())??;

            // Stays owed if the read below times out or is dropped
            link.owed += 1;
            match timeout_at(deadline, link.transport.read_until_prompt())
                .await
                .map_err(|_| timed_out())?
            {
                Ok(raw) => {
                    link.owed -= 1;
                    raw
                }
                Err(e) => {
                    link.owed = 0;
                    return Err(e);
                }
            }
        };

        let payload = strip_echo(&raw, &line);
        debug!(command = %line, payload = %payload, "<- rotator");

        if let Some(at) = payload.find(ERROR_MARKER) {
            return Err(RotatorError::Rejected {
                command: line,
                reason: payload[at + ERROR_MARKER.len()..].trim().to_string(),
            });
        }

        Ok(payload)
    }

    pub async fn set_position(&self, position: Position) -> Result<()> {
        self.send(&Command::SetPosition(position)).await.map(drop)
    }

    pub async fn get_position(&self) -> Result<Position> {
        let payload = self.send(&Command::GetPosition).await?;
        parse_position(&payload)
    }

    pub async fn move_toward(&self, direction: Direction, speed: i32) -> Result<()> {
        self.send(&Command::Move { direction, speed }).await.map(drop)
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(&Command::Stop).await.map(drop)
    }

    pub async fn park(&self) -> Result<()> {
        self.send(&Command::Park).await.map(drop)
    }

    /// Model name and miscellaneous backend information
    pub async fn info(&self) -> Result<String> {
        self.send(&Command::Info).await
    }

    /// Ask the console to hold off the next command for `seconds`.
    pub async fn pause(&self, seconds: u32) -> Result<()> {
        self.send(&Command::Pause(seconds)).await.map(drop)
    }

    /// Maidenhead locator for a longitude/latitude, `locator_len` in 2..=12
    pub async fn lonlat_to_locator(&self, longitude: f64, latitude: f64, locator_len: u8) -> Result<String> {
        let payload = self
            .send(&Command::LonLatToLocator {
                longitude,
                latitude,
                locator_len,
            })
            .await?;

        let locator = payload
            .split_once("Locator:")
            .map(|(_, rest)| rest.trim())
            .unwrap_or(payload.as_str());
        if locator.is_empty() {
            return Err(RotatorError::MalformedResponse(format!("no locator in {payload:?}")));
        }
        Ok(locator.to_string())
    }

    /// Center of a Maidenhead square as (longitude, latitude)
    pub async fn locator_to_lonlat(&self, locator: &str) -> Result<(f64, f64)> {
        let payload = self.send(&Command::LocatorToLonLat(locator.to_string())).await?;
        Ok((
            labeled_value(&payload, "Longitude")?,
            labeled_value(&payload, "Latitude")?,
        ))
    }

    pub async fn dms_to_decimal(&self, degrees: i32, minutes: i32, seconds: f64, hemisphere: Hemisphere) -> Result<f64> {
        let payload = self
            .send(&Command::DmsToDecimal {
                degrees,
                minutes,
                seconds,
                hemisphere,
            })
            .await?;
        labeled_value(&payload, "Dec Degrees")
    }

    /// Raw `Degrees/Minutes/Seconds/S/W` answer
    pub async fn decimal_to_dms(&self, value: f64) -> Result<String> {
        self.send(&Command::DecimalToDms(value)).await
    }

    pub async fn dmm_to_decimal(&self, degrees: i32, minutes: f64, hemisphere: Hemisphere) -> Result<f64> {
        let payload = self
            .send(&Command::DmmToDecimal {
                degrees,
                minutes,
                hemisphere,
            })
            .await?;
        labeled_value(&payload, "Dec Degrees")
    }

    /// Raw `Degrees/Minutes/S/W` answer
    pub async fn decimal_to_dmm(&self, value: f64) -> Result<String> {
        self.send(&Command::DecimalToDmm(value)).await
    }

    /// Distance (km) and azimuth (deg) between two points
    pub async fn qrb(&self, lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Result<(f64, f64)> {
        let payload = self.send(&Command::Qrb { lon1, lat1, lon2, lat2 }).await?;
        Ok((
            labeled_value(&payload, "Distance")?,
            labeled_value(&payload, "Azimuth")?,
        ))
    }

    pub async fn long_path_deg(&self, short_path_deg: f64) -> Result<f64> {
        let payload = self.send(&Command::ShortToLongPathDeg(short_path_deg)).await?;
        labeled_value(&payload, "Long Path Deg")
    }

    pub async fn long_path_km(&self, short_path_km: f64) -> Result<f64> {
        let payload = self.send(&Command::ShortToLongPathKm(short_path_km)).await?;
        labeled_value(&payload, "Long Path km")
    }

    /// Leave the console and release the transport.
    ///
    /// The console prints no prompt after `q`, so only the write is awaited.
    pub async fn exit(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let deadline = Instant::now() + self.timeout;

        match timeout_at(deadline, link.transport.write_line(&Command::Exit.to_line())).await {
            Ok(Ok(())) | Ok(Err(RotatorError::TransportClosed)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => debug!("exit write timed out, closing anyway"),
        }
        link.owed = 0;
        link.transport.close().await
    }
}

/// Drop the echoed command line, if the console echoed it, and trim.
fn strip_echo(raw: &str, line: &str) -> String {
    let out = raw.trim();
    match out.strip_prefix(line) {
        Some(rest) => rest.trim().to_string(),
        None => out.to_string(),
    }
}
