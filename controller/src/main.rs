//! Rotator Controller
//!
//! Drives an az/el rotator through hamlib `rotctl` (or a TCP console, or an
//! in-memory mock): manual positioning, sun and TLE tracking, solar scans.
//!
//! Usage:
//!   rotator-controller position
//!   rotator-controller set 163 41.5
//!   rotator-controller --mock scan --span 4 --step 0.25
//!   rotator-controller track-tle --line1 "1 25544U ..." --line2 "2 25544 ..."
//!   rotator-controller follow-file pass.tsv --record reported.tsv

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rotator_protocol::{CommandChannel, Direction, Position};
use rotator_tracking::{
    EndReason, PositionSource, ScanSource, SunSource, TleSource, TrackFileSource, Tracker,
    TrackingEvent,
};
use solar_scan::ScanPattern;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod connection;
mod record;

use config::ControllerConfig;
use connection::Connection;
use record::TrackRecord;

#[derive(Parser, Debug)]
#[command(name = "rotator-controller", about = "Point an az/el rotator at satellites, the sun, or anywhere")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// hamlib rotator model number
    #[arg(long, global = true)]
    model: Option<u32>,

    /// Rotator device path
    #[arg(long, global = true)]
    device: Option<String>,

    /// Talk to a console at host:port instead of spawning rotctl
    #[arg(long, global = true)]
    connect: Option<String>,

    /// Use an in-memory rotator
    #[arg(long, global = true)]
    mock: bool,

    /// Print results and tracking events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the reported position
    Position,
    /// Command a position
    Set {
        #[arg(allow_negative_numbers = true)]
        azimuth: f64,
        #[arg(allow_negative_numbers = true)]
        elevation: f64,
    },
    /// Start moving in one direction until `stop`
    Move {
        #[arg(value_enum)]
        direction: DirectionArg,
        /// 1..=100, or -1 to keep the current speed
        #[arg(long, default_value_t = 50, allow_negative_numbers = true,
              value_parser = clap::value_parser!(i32).range(-1..=100))]
        speed: i32,
    },
    Stop,
    Park,
    /// Rotator model and backend information
    Info,
    /// Print the sun position for the station, now
    Sun,
    /// Maidenhead locator of the station
    Locator {
        #[arg(long, default_value_t = 6)]
        length: u8,
    },
    /// Distance and bearing from the station to a point
    Bearing {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
    /// Snake scan around the sun
    Scan {
        /// Full width of the square, degrees
        #[arg(long)]
        span: Option<f64>,
        /// Increment, degrees
        #[arg(long)]
        step: Option<f64>,
        /// Print the path without moving the rotator
        #[arg(long)]
        dry_run: bool,
    },
    /// Follow the sun until interrupted
    TrackSun {
        /// Hold off while the sun is below this elevation
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        min_elevation: f64,
    },
    /// Follow a satellite given as a two-line element set
    TrackTle {
        #[arg(long)]
        line1: String,
        #[arg(long)]
        line2: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Follow a pre-computed track file (time, azimuth, elevation; tab-separated)
    FollowFile {
        path: PathBuf,
        /// Write the reported position of each converged point here, same layout
        #[arg(long)]
        record: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Up,
    Down,
    Left,
    Right,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Up => Direction::Up,
            DirectionArg::Down => Direction::Down,
            DirectionArg::Left => Direction::Left,
            DirectionArg::Right => Direction::Right,
        }
    }
}

impl Cli {
    /// Flags win over file and environment.
    fn apply_overrides(&self, config: &mut ControllerConfig) {
        if let Some(model) = self.model {
            config.rotator.model = model;
        }
        if let Some(device) = &self.device {
            config.rotator.device = device.clone();
        }
        if let Some(addr) = &self.connect {
            config.rotator.connect = Some(addr.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays clean
    let default_filter = if cli.verbose {
        "rotator_controller=debug,rotator_tracking=debug,rotator_protocol=debug"
    } else {
        "rotator_controller=info,rotator_tracking=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = ControllerConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    // Commands that never touch the rotator
    match &cli.command {
        Commands::Sun => return print_sun(&config, cli.json),
        Commands::Scan { span, step, dry_run: true } => {
            let path = scan_pattern(&config, *span, *step).generate(config.station.observer().sun_at(Utc::now()))?;
            if cli.json {
                println!("{}", serde_json::to_string(&path)?);
            } else {
                println!("Scan around {} ({} points)", path.center(), path.len());
                for (i, point) in path.iter().enumerate() {
                    println!("{:4} {}", i, point);
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let connection = Connection::open(&config.rotator, cli.mock).await?;
    info!("Rotator connected via {}", connection.kind());
    let channel = CommandChannel::new(connection).with_timeout(config.rotator.command_timeout());

    let result = run(&cli, &config, &channel).await;

    if let Err(e) = channel.exit().await {
        warn!("Closing rotator connection failed: {}", e);
    }
    result
}

async fn run(cli: &Cli, config: &ControllerConfig, channel: &CommandChannel<Connection>) -> Result<()> {
    match &cli.command {
        Commands::Position => print_position(channel.get_position().await?, cli.json)?,
        Commands::Set { azimuth, elevation } => {
            channel.set_position(Position::new(*azimuth, *elevation)).await?;
            info!("Commanded Az={} El={}", azimuth, elevation);
        }
        Commands::Move { direction, speed } => {
            channel.move_toward((*direction).into(), *speed).await?;
            info!("Moving {:?} at speed {}", direction, speed);
        }
        Commands::Stop => channel.stop().await?,
        Commands::Park => channel.park().await?,
        Commands::Info => println!("{}", channel.info().await?),
        Commands::Locator { length } => {
            let station = &config.station;
            let locator = channel
                .lonlat_to_locator(station.longitude_deg, station.latitude_deg, *length)
                .await?;
            println!("{}", locator);
        }
        Commands::Bearing { latitude, longitude } => {
            let station = &config.station;
            let (distance_km, azimuth) = channel
                .qrb(station.longitude_deg, station.latitude_deg, *longitude, *latitude)
                .await?;
            if cli.json {
                println!("{}", serde_json::json!({ "distance_km": distance_km, "azimuth": azimuth }));
            } else {
                println!("{:.1} km at {:.2}°", distance_km, azimuth);
            }
        }
        Commands::Sun => print_sun(config, cli.json)?,
        Commands::Scan { span, step, .. } => {
            let center = config.station.observer().sun_at(Utc::now());
            let path = scan_pattern(config, *span, *step).generate(center)?;
            info!("Scanning {} points around {}", path.len(), center);
            track(channel, config, ScanSource::new(&path), cli.json, None).await?;
        }
        Commands::TrackSun { min_elevation } => {
            let source = SunSource::new(config.station.observer()).with_min_elevation(*min_elevation);
            track(channel, config, source, cli.json, None).await?;
        }
        Commands::TrackTle { line1, line2, name } => {
            let observer = config.station.observer();
            let source = match name {
                Some(name) => TleSource::named(name, line1, line2, observer)?,
                None => TleSource::from_lines(line1, line2, observer)?,
            };
            track(channel, config, source, cli.json, None).await?;
        }
        Commands::FollowFile { path, record } => {
            let source = TrackFileSource::from_path(path)?;
            let mut record = record.as_deref().map(TrackRecord::create).transpose()?;
            let result = track(channel, config, source, cli.json, record.as_mut()).await;

            if let Some(record) = record {
                let lines = record.finish()?;
                info!("Recorded {} reported positions", lines);
            }
            result?;
        }
    }
    Ok(())
}

fn scan_pattern(config: &ControllerConfig, span: Option<f64>, step: Option<f64>) -> ScanPattern {
    ScanPattern::square(
        span.unwrap_or(config.scan.span_deg),
        step.unwrap_or(config.scan.step_deg),
    )
}

/// Run a tracking session until it ends or Ctrl-C, then stop the rotator.
async fn track<S: PositionSource>(
    channel: &CommandChannel<Connection>,
    config: &ControllerConfig,
    source: S,
    json: bool,
    mut record: Option<&mut TrackRecord>,
) -> Result<()> {
    let mut tracker = Tracker::new(channel.clone(), config.tracking.clone())?;
    let mut events = tracker.subscribe();
    let session = tracker.start(source)?;
    info!(%session, "Tracking, Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let reason = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                // The session may have ended on its own meanwhile
                let _ = tracker.stop();
                break tracker.join().await;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    report(&event, json)?;
                    if let Some(record) = record.as_deref_mut() {
                        record.observe(&event)?;
                    }
                    if matches!(event, TrackingEvent::SessionEnded { .. }) {
                        break tracker.join().await;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output fell behind"),
                Err(RecvError::Closed) => break tracker.join().await,
            }
        }
    };

    if let Err(e) = channel.stop().await {
        warn!("Stopping rotator failed: {}", e);
    }

    match reason {
        Some(reason) if !reason.is_normal() => bail!("Tracking ended: {:?}", reason),
        _ => Ok(()),
    }
}

fn report(event: &TrackingEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        TrackingEvent::TargetCommanded { target, .. } => println!("-> {}", target),
        TrackingEvent::Converged { target, polls, .. } => {
            println!("on target {} after {} poll(s)", target, polls)
        }
        TrackingEvent::Degraded { consecutive_failures, .. } => {
            println!("degraded: {} consecutive source failures", consecutive_failures)
        }
        TrackingEvent::SessionEnded { reason, .. } => println!("session ended: {}", describe(*reason)),
        _ => {}
    }
    Ok(())
}

fn describe(reason: EndReason) -> &'static str {
    match reason {
        EndReason::Cancelled => "stopped",
        EndReason::SourceExhausted => "path complete",
        EndReason::SourceAbandoned => "target source unavailable",
        EndReason::TransportClosed => "rotator connection lost",
        EndReason::ProtocolMismatch => "unexpected rotator answer",
        EndReason::DeviceUnresponsive => "rotator not responding",
    }
}

fn print_sun(config: &ControllerConfig, json: bool) -> Result<()> {
    print_position(config.station.observer().sun_at(Utc::now()), json)
}

fn print_position(position: Position, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&position)?);
    } else {
        println!("{}", position);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_negative_angles() {
        let cli = Cli::try_parse_from(["rotator-controller", "set", "-10", "-5.5"]).unwrap();
        match cli.command {
            Commands::Set { azimuth, elevation } => {
                assert_eq!(azimuth, -10.0);
                assert_eq!(elevation, -5.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["rotator-controller", "position", "--mock", "--json", "--model", "603"]).unwrap();
        assert!(cli.mock);
        assert!(cli.json);

        let mut config = ControllerConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.rotator.model, 603);
        assert_eq!(config.rotator.connect, None);
    }

    #[test]
    fn test_cli_move_speed_range() {
        assert!(Cli::try_parse_from(["rotator-controller", "move", "left", "--speed", "-1"]).is_ok());
        assert!(Cli::try_parse_from(["rotator-controller", "move", "up", "--speed", "101"]).is_err());
    }

    #[test]
    fn test_scan_pattern_falls_back_to_config() {
        let config = ControllerConfig::default();
        let pattern = scan_pattern(&config, Some(2.0), None);
        assert_eq!(pattern, ScanPattern::square(2.0, 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_runs_against_mock() {
        let config = ControllerConfig::default();
        let connection = Connection::open(&config.rotator, true).await.unwrap();
        let channel = CommandChannel::new(connection);

        let path = ScanPattern::square(1.0, 1.0).generate(Position::new(100.0, 30.0)).unwrap();
        track(&channel, &config, ScanSource::new(&path), true, None).await.unwrap();

        let last = path.get(path.len() - 1).unwrap();
        assert_eq!(channel.get_position().await.unwrap(), last);
    }

    #[test]
    fn test_cli_follow_file() {
        let cli = Cli::try_parse_from(["rotator-controller", "follow-file", "pass.tsv", "--record", "out.tsv"]).unwrap();
        match cli.command {
            Commands::FollowFile { path, record } => {
                assert_eq!(path, PathBuf::from("pass.tsv"));
                assert_eq!(record, Some(PathBuf::from("out.tsv")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_file_records_reported_positions() {
        let dir = tempfile::tempdir().unwrap();
        let track_path = dir.path().join("pass.tsv");
        let record_path = dir.path().join("reported.tsv");
        std::fs::write(&track_path, "t0\t163.5\t41\nt1\t164\t41.5\nt2\t164.5\t42\n").unwrap();

        let config = ControllerConfig::default();
        let connection = Connection::open(&config.rotator, true).await.unwrap();
        let channel = CommandChannel::new(connection);

        let source = TrackFileSource::from_path(&track_path).unwrap();
        let mut record = TrackRecord::create(&record_path).unwrap();
        track(&channel, &config, source, true, Some(&mut record)).await.unwrap();
        assert_eq!(record.finish().unwrap(), 3);

        let reported = TrackFileSource::from_path(&record_path).unwrap();
        let targets: Vec<Position> = reported.points().iter().map(|p| p.target).collect();
        assert_eq!(
            targets,
            vec![Position::new(163.5, 41.0), Position::new(164.0, 41.5), Position::new(164.5, 42.0)]
        );
        assert_eq!(channel.get_position().await.unwrap(), Position::new(164.5, 42.0));
    }
}
