//! Controller configuration
//!
//! Layered: defaults, then an optional JSON file, then `ROTATOR_*`
//! environment variables. Command-line flags are applied last by `main`.

use anyhow::{Context, Result};
use rotator_protocol::{DEFAULT_COMMAND_TIMEOUT, ROTCTL_PROMPT};
use rotator_tracking::TrackingConfig;
use serde::{Deserialize, Serialize};
use solar_scan::Observer;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub station: StationConfig,
    pub rotator: RotatorConfig,
    pub tracking: TrackingConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub name: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: "Palaiseau".to_string(),
            latitude_deg: 48.68333,
            longitude_deg: 2.13333,
            altitude_m: 0.0,
        }
    }
}

impl StationConfig {
    pub fn observer(&self) -> Observer {
        Observer::new(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorConfig {
    /// hamlib rotator model number (`rotctl -l`); 1 is the dummy backend
    pub model: u32,
    pub device: String,
    /// `host:port` of a console reachable over TCP; replaces spawning rotctl
    pub connect: Option<String>,
    pub prompt: String,
    pub command_timeout_ms: u64,
    pub startup_timeout_ms: u64,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            model: 1,
            device: "/dev/ttyUSB0".to_string(),
            connect: None,
            prompt: ROTCTL_PROMPT.to_string(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            startup_timeout_ms: 5000,
        }
    }
}

impl RotatorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub span_deg: f64,
    pub step_deg: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            span_deg: 5.0,
            step_deg: 0.5,
        }
    }
}

impl ControllerConfig {
    /// Defaults, overlaid with `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `ROTATOR_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "ROTATOR_LAT") {
            self.station.latitude_deg = v;
        }
        if let Some(v) = parsed(&lookup, "ROTATOR_LON") {
            self.station.longitude_deg = v;
        }
        if let Some(v) = parsed(&lookup, "ROTATOR_ALT_M") {
            self.station.altitude_m = v;
        }
        if let Some(v) = parsed(&lookup, "ROTATOR_MODEL") {
            self.rotator.model = v;
        }
        if let Some(device) = lookup("ROTATOR_DEVICE") {
            self.rotator.device = device;
        }
        if let Some(addr) = lookup("ROTATOR_CONNECT") {
            self.rotator.connect = Some(addr).filter(|a| !a.is_empty());
        }
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}
