//! Tracker
//!
//! Idle/Tracking state machine around at most one background session.
//! `stop()` only raises the session's cancel flag; the task winds down on its
//! own and `join()` collects its [`EndReason`].

use crate::config::TrackingConfig;
use crate::events::{EndReason, TrackingEvent};
use crate::session::{CancelFlag, Session};
use crate::source::PositionSource;
use crate::TrackingError;
use rotator_protocol::{CommandChannel, DeviceTransport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Tracking,
}

struct ActiveSession {
    id: Uuid,
    cancel: Arc<CancelFlag>,
    handle: JoinHandle<EndReason>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

pub struct Tracker<T> {
    channel: CommandChannel<T>,
    config: TrackingConfig,
    events: broadcast::Sender<TrackingEvent>,
    session: Option<ActiveSession>,
}

impl<T: DeviceTransport> Tracker<T> {
    pub fn new(channel: CommandChannel<T>, config: TrackingConfig) -> Result<Self, TrackingError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            channel,
            config,
            events,
            session: None,
        })
    }

    /// Begin tracking `source` in a background task. Only legal from Idle.
    pub fn start<S: PositionSource>(&mut self, source: S) -> Result<Uuid, TrackingError> {
        if self.state() == TrackingState::Tracking {
            return Err(TrackingError::AlreadyTracking);
        }

        let id = Uuid::new_v4();
        let cancel = Arc::new(CancelFlag::default());
        let session = Session {
            id,
            channel: self.channel.clone(),
            source,
            config: self.config.clone(),
            cancel: Arc::clone(&cancel),
            events: self.events.clone(),
        };

        let handle = tokio::spawn(session.run());
        // A previous, stopped session may still be finishing its last command;
        // it is detached here and ends on its own.
        self.session = Some(ActiveSession { id, cancel, handle });
        Ok(id)
    }

    /// Cancel the running session without waiting for it. Only legal from
    /// Tracking; the tracker reads Idle as soon as this returns.
    pub fn stop(&self) -> Result<(), TrackingError> {
        match &self.session {
            Some(session) if session.is_running() => {
                info!(session = %session.id, "Stopping tracking");
                session.cancel.cancel();
                Ok(())
            }
            _ => Err(TrackingError::NotTracking),
        }
    }

    pub fn state(&self) -> TrackingState {
        match &self.session {
            Some(session) if session.is_running() => TrackingState::Tracking,
            _ => TrackingState::Idle,
        }
    }

    /// Id of the current or most recent session
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Wait for the current or most recently stopped session to finish.
    ///
    /// Returns `None` when there is no session to wait for. Does not cancel;
    /// call [`stop`](Self::stop) first to end a session that would otherwise
    /// run forever.
    pub async fn join(&mut self) -> Option<EndReason> {
        let session = self.session.take()?;
        match session.handle.await {
            Ok(reason) => Some(reason),
            Err(e) => {
                error!(session = %session.id, error = %e, "Tracking task failed");
                None
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    /// Shared channel for polling the rotator alongside the session; calls
    /// are serialized with the session's own commands.
    pub fn channel(&self) -> &CommandChannel<T> {
        &self.channel
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::source::{from_fn, FixedSource, ScanSource, SourceError};
    use rotator_protocol::{MockTransport, Position, StreamTransport, ROTCTL_PROMPT};
    use solar_scan::snake_path;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::Instant;

    async fn wait_for<F>(rx: &mut broadcast::Receiver<TrackingEvent>, pred: F) -> TrackingEvent
    where
        F: Fn(&TrackingEvent) -> bool,
    {
        let next = async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event stream closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(600), next)
            .await
            .expect("event never arrived")
    }

    fn tracker(mock: MockTransport, config: TrackingConfig) -> Tracker<MockTransport> {
        Tracker::new(CommandChannel::new(mock), config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_first_check_within_tolerance() {
        let mock = MockTransport::new().with_reported(Position::new(120.0, 30.0));
        let handle = mock.handle();
        let mut tracker = tracker(mock, TrackingConfig::default().with_tolerance(2.0));
        let mut events = tracker.subscribe();

        tracker.start(FixedSource(Position::new(121.0, 31.0))).unwrap();
        assert_eq!(tracker.state(), TrackingState::Tracking);

        let converged = wait_for(&mut events, |e| matches!(e, TrackingEvent::Converged { .. })).await;
        match converged {
            TrackingEvent::Converged { polls, target, .. } => {
                assert_eq!(polls, 1);
                assert_eq!(target, Position::new(121.0, 31.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handle.commands()[..2], ["P 121 31".to_string(), "p".to_string()]);

        tracker.stop().unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_polling_outside_tolerance() {
        let mock = MockTransport::new().with_reported(Position::new(120.0, 30.0));
        let handle = mock.handle();
        let mut tracker = tracker(mock, TrackingConfig::default().with_tolerance(0.5));
        let mut events = tracker.subscribe();

        tracker.start(FixedSource(Position::new(121.0, 31.0))).unwrap();

        let mut reports = 0;
        while reports < 10 {
            match wait_for(&mut events, |_| true).await {
                TrackingEvent::PositionReported { error_deg, .. } => {
                    assert!((error_deg - 2f64.sqrt()).abs() < 1e-9);
                    reports += 1;
                }
                TrackingEvent::Converged { .. } => panic!("converged outside tolerance"),
                _ => {}
            }
        }

        // One set, then nothing but polls
        assert_eq!(handle.count("P"), 1);
        assert!(handle.count("p") >= 10);

        tracker.stop().unwrap();
        assert_eq!(tracker.state(), TrackingState::Idle);
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_prompt_and_bounded() {
        let mock = MockTransport::new().following_commands();
        let handle = mock.handle();
        let config = TrackingConfig::default();
        let poll_interval = config.poll_interval();
        let mut tracker = tracker(mock, config);
        let mut events = tracker.subscribe();

        let mut azimuth = 0.0;
        tracker
            .start(from_fn(move || {
                azimuth += 3.0;
                Ok(Position::new(azimuth, 10.0))
            }))
            .unwrap();

        for _ in 0..3 {
            wait_for(&mut events, |e| matches!(e, TrackingEvent::Converged { .. })).await;
        }

        let sets_at_stop = handle.count("P");
        let stopped_at = Instant::now();
        tracker.stop().unwrap();
        assert_eq!(tracker.state(), TrackingState::Idle);

        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
        assert!(stopped_at.elapsed() <= poll_interval);
        assert!(handle.count("P") <= sets_at_stop + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failures_degrade_then_abandon() {
        let config = TrackingConfig {
            retry: RetryPolicy {
                degraded_after: 3,
                abandon_after: Some(5),
                ..RetryPolicy::default()
            },
            ..TrackingConfig::default()
        };
        let mock = MockTransport::new();
        let handle = mock.handle();
        let mut tracker = tracker(mock, config);
        let mut events = tracker.subscribe();

        tracker
            .start(from_fn(|| Err(SourceError::Unavailable("feed down".to_string()))))
            .unwrap();

        let mut failures = 0;
        let mut degraded = Vec::new();
        let reason = loop {
            match wait_for(&mut events, |_| true).await {
                TrackingEvent::SourceFailed { consecutive, .. } => {
                    failures += 1;
                    assert_eq!(consecutive, failures);
                }
                TrackingEvent::Degraded { consecutive_failures, .. } => degraded.push(consecutive_failures),
                TrackingEvent::SessionEnded { reason, .. } => break reason,
                _ => {}
            }
        };

        assert_eq!(reason, EndReason::SourceAbandoned);
        assert_eq!(failures, 5);
        assert_eq!(degraded, vec![3]);
        assert!(handle.commands().is_empty());
        assert_eq!(tracker.join().await, Some(EndReason::SourceAbandoned));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_recovers_after_failures() {
        let mut calls = 0;
        let source = from_fn(move || {
            calls += 1;
            if calls <= 2 {
                Err(SourceError::Unavailable("not yet".to_string()))
            } else {
                Ok(Position::new(45.0, 45.0))
            }
        });
        let mock = MockTransport::new().following_commands();
        let mut tracker = tracker(mock, TrackingConfig::default());
        let mut events = tracker.subscribe();

        tracker.start(source).unwrap();
        wait_for(&mut events, |e| matches!(e, TrackingEvent::Converged { .. })).await;
        assert_eq!(tracker.state(), TrackingState::Tracking);

        tracker.stop().unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_closed_ends_session() {
        let mock = MockTransport::new().following_commands().disconnect_after(3);
        let mut tracker = tracker(mock, TrackingConfig::default());

        tracker.start(FixedSource(Position::new(10.0, 10.0))).unwrap();

        assert_eq!(tracker.join().await, Some(EndReason::TransportClosed));
        assert_eq!(tracker.state(), TrackingState::Idle);
        assert_eq!(tracker.stop(), Err(TrackingError::NotTracking));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_device_ends_session() {
        let config = TrackingConfig {
            retry: RetryPolicy {
                max_command_failures: Some(3),
                ..RetryPolicy::default()
            },
            ..TrackingConfig::default()
        };
        let mock = MockTransport::new();
        mock.handle().set_silent(true);
        let channel = CommandChannel::new(mock).with_timeout(Duration::from_millis(200));
        let mut tracker = Tracker::new(channel, config).unwrap();
        let mut events = tracker.subscribe();

        tracker.start(FixedSource(Position::new(10.0, 10.0))).unwrap();

        let failed = wait_for(&mut events, |e| matches!(e, TrackingEvent::CommandFailed { .. })).await;
        match failed {
            TrackingEvent::CommandFailed { command, consecutive, .. } => {
                assert_eq!(command, "set_pos");
                assert_eq!(consecutive, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tracker.join().await, Some(EndReason::DeviceUnresponsive));
    }

    /// Console that accepts set_pos and answers get_pos with nonsense
    async fn garbage_console(device: tokio::io::DuplexStream) {
        let (reader, mut writer) = tokio::io::split(device);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let answer = if line == "p" { "garbage\n" } else { "" };
            let framed = format!("{answer}{ROTCTL_PROMPT} ");
            if writer.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_answer_is_protocol_mismatch() {
        let (client, device) = tokio::io::duplex(1024);
        tokio::spawn(garbage_console(device));
        let (reader, writer) = tokio::io::split(client);
        let channel = CommandChannel::new(StreamTransport::new(reader, writer, ROTCTL_PROMPT));
        let mut tracker = Tracker::new(channel, TrackingConfig::default()).unwrap();

        tracker.start(FixedSource(Position::new(10.0, 10.0))).unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::ProtocolMismatch));
    }

    /// Console that follows set_pos and answers its first get_pos after 500 ms
    async fn slow_console(device: tokio::io::DuplexStream) {
        let (reader, mut writer) = tokio::io::split(device);
        let mut lines = BufReader::new(reader).lines();
        let mut position = (0.0, 0.0);
        let mut first_poll = true;

        while let Ok(Some(line)) = lines.next_line().await {
            let mut parts = line.split_whitespace();
            let answer = match parts.next() {
                Some("P") => {
                    let args: Vec<f64> = parts.filter_map(|t| t.parse().ok()).collect();
                    if let [az, el] = &args[..] {
                        position = (*az, *el);
                    }
                    String::new()
                }
                Some("p") => {
                    if first_poll {
                        first_poll = false;
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    format!("Azimuth: {}\nElevation: {}\n", position.0, position.1)
                }
                _ => String::new(),
            };
            let framed = format!("{answer}{ROTCTL_PROMPT} ");
            if writer.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_answer_does_not_end_session() {
        let (client, device) = tokio::io::duplex(1024);
        tokio::spawn(slow_console(device));
        let (reader, writer) = tokio::io::split(client);
        let channel = CommandChannel::new(StreamTransport::new(reader, writer, ROTCTL_PROMPT))
            .with_timeout(Duration::from_millis(200));
        let mut tracker = Tracker::new(channel, TrackingConfig::default()).unwrap();
        let mut events = tracker.subscribe();

        tracker.start(FixedSource(Position::new(10.0, 10.0))).unwrap();

        let mut timeouts = 0;
        let converged = loop {
            match wait_for(&mut events, |_| true).await {
                TrackingEvent::CommandFailed { command, .. } => {
                    assert_eq!(command, "get_pos");
                    timeouts += 1;
                }
                TrackingEvent::PositionReported { reported, .. } => {
                    assert_eq!(reported, Position::new(10.0, 10.0));
                }
                TrackingEvent::Converged { polls, .. } => break polls,
                TrackingEvent::SessionEnded { reason, .. } => panic!("session ended: {reason:?}"),
                _ => {}
            }
        };

        assert_eq!(timeouts, 1);
        assert_eq!(converged, 1);
        assert_eq!(tracker.state(), TrackingState::Tracking);

        tracker.stop().unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_source_runs_to_exhaustion() {
        let path = snake_path(Position::new(180.0, 20.0), 1.0, 1.0).unwrap();
        let mock = MockTransport::new().following_commands();
        let handle = mock.handle();
        let mut tracker = tracker(mock, TrackingConfig::default());

        tracker.start(ScanSource::new(&path)).unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::SourceExhausted));

        let sets: Vec<String> = handle
            .commands()
            .into_iter()
            .filter(|line| line.starts_with("P "))
            .collect();
        assert_eq!(
            sets,
            vec!["P 179.5 19.5", "P 180.5 19.5", "P 180.5 20.5", "P 179.5 20.5"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_legality() {
        let mut tracker = tracker(MockTransport::new().following_commands(), TrackingConfig::default());
        assert_eq!(tracker.state(), TrackingState::Idle);
        assert_eq!(tracker.stop(), Err(TrackingError::NotTracking));
        assert_eq!(tracker.join().await, None);

        let first = tracker.start(FixedSource(Position::new(1.0, 1.0))).unwrap();
        assert_eq!(
            tracker.start(FixedSource(Position::new(2.0, 2.0))),
            Err(TrackingError::AlreadyTracking)
        );

        tracker.stop().unwrap();
        assert_eq!(tracker.stop(), Err(TrackingError::NotTracking));

        // Restart is a new session
        let second = tracker.start(FixedSource(Position::new(2.0, 2.0))).unwrap();
        assert_ne!(first, second);
        assert_eq!(tracker.session_id(), Some(second));

        tracker.stop().unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_shared_with_session() {
        let mock = MockTransport::new().with_reported(Position::new(120.0, 30.0));
        let mut tracker = tracker(mock, TrackingConfig::default().with_tolerance(0.5));
        let mut events = tracker.subscribe();
        tracker.start(FixedSource(Position::new(121.0, 31.0))).unwrap();
        wait_for(&mut events, |e| matches!(e, TrackingEvent::PositionReported { .. })).await;

        let ui = tracker.channel().clone();
        let poller = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..5 {
                seen.push(ui.get_position().await.unwrap());
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            seen
        });

        let seen = poller.await.unwrap();
        assert!(seen.iter().all(|p| *p == Position::new(120.0, 30.0)));

        tracker.stop().unwrap();
        assert_eq!(tracker.join().await, Some(EndReason::Cancelled));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = Tracker::new(
            CommandChannel::new(MockTransport::new()),
            TrackingConfig::default().with_tolerance(-1.0),
        );
        assert!(matches!(result, Err(TrackingError::InvalidConfig(_))));
    }
}
