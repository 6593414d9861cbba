//! Reported-position log
//!
//! One `time<TAB>azimuth<TAB>elevation` line per converged target, holding
//! where the rotator said it was. Same layout as a track file, so a record
//! can be replayed with `follow-file`.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use rotator_protocol::Position;
use rotator_tracking::TrackingEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct TrackRecord {
    writer: Box<dyn Write + Send>,
    last_reported: Option<Position>,
    lines: usize,
}

impl TrackRecord {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating record {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }

    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            last_reported: None,
            lines: 0,
        }
    }

    pub fn observe(&mut self, event: &TrackingEvent) -> Result<()> {
        match event {
            TrackingEvent::PositionReported { reported, .. } => self.last_reported = Some(*reported),
            TrackingEvent::Converged { timestamp, .. } => {
                if let Some(reported) = self.last_reported.take() {
                    let time = Utc
                        .timestamp_millis_opt(*timestamp)
                        .single()
                        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
                        .unwrap_or_else(|| timestamp.to_string());
                    writeln!(self.writer, "{}\t{}\t{}", time, reported.azimuth, reported.elevation)?;
                    self.lines += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        Ok(self.lines)
    }
}
