//! Tracking session routine
//!
//! One background task per session:
//!
//! ```text
//! sample source → set_pos → poll get_pos until within tolerance → dwell → repeat
//! ```
//!
//! Every sleep goes through [`CancelFlag::sleep`], which checks the flag on
//! both sides of the wait and is woken early by `cancel()`.

use crate::config::TrackingConfig;
use crate::events::{now_ms, EndReason, TrackingEvent};
use crate::source::{PositionSource, SourceError};
use rotator_protocol::{angular_error, CommandChannel, DeviceTransport, Position, RotatorError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Set once, never cleared; a new session gets a new flag.
#[derive(Debug, Default)]
pub(crate) struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` if the
    /// session should stop.
    pub(crate) async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before the check so a cancel in between still wakes us.
        notified.as_mut().enable();

        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = &mut notified => {}
        }
        !self.is_cancelled()
    }
}

pub(crate) struct Session<T, S> {
    pub(crate) id: Uuid,
    pub(crate) channel: CommandChannel<T>,
    pub(crate) source: S,
    pub(crate) config: TrackingConfig,
    pub(crate) cancel: Arc<CancelFlag>,
    pub(crate) events: broadcast::Sender<TrackingEvent>,
}

/// Consecutive failure counts
#[derive(Debug, Default)]
struct Failures {
    source: u32,
    command: u32,
}

impl<T, S> Session<T, S>
where
    T: DeviceTransport,
    S: PositionSource,
{
    pub(crate) async fn run(mut self) -> EndReason {
        let description = self.source.describe();
        info!(
            session = %self.id,
            source = %description,
            tolerance_deg = self.config.tolerance_deg,
            "Tracking session started"
        );
        self.emit(TrackingEvent::SessionStarted {
            session: self.id,
            source: description,
            tolerance_deg: self.config.tolerance_deg,
            timestamp: now_ms(),
        });

        let reason = self.track().await;

        if reason.is_normal() {
            info!(session = %self.id, ?reason, "Tracking session ended");
        } else {
            error!(session = %self.id, ?reason, "Tracking session aborted");
        }
        self.emit(TrackingEvent::SessionEnded {
            session: self.id,
            reason,
            timestamp: now_ms(),
        });
        reason
    }

    async fn track(&mut self) -> EndReason {
        let mut failures = Failures::default();

        loop {
            if self.cancel.is_cancelled() {
                return EndReason::Cancelled;
            }

            let target = match self.source.current_target().await {
                Ok(target) => {
                    failures.source = 0;
                    target
                }
                Err(SourceError::Exhausted) => return EndReason::SourceExhausted,
                Err(e) => {
                    if let Some(reason) = self.source_failed(&mut failures, e) {
                        return reason;
                    }
                    let wait = self.config.poll_interval() + self.config.retry.backoff();
                    if !self.cancel.sleep(wait).await {
                        return EndReason::Cancelled;
                    }
                    continue;
                }
            };

            // Last check before anything goes to the device
            if self.cancel.is_cancelled() {
                return EndReason::Cancelled;
            }

            match self.channel.set_position(target).await {
                Ok(()) => {
                    failures.command = 0;
                    debug!(session = %self.id, %target, "Target commanded");
                    self.emit(TrackingEvent::TargetCommanded {
                        session: self.id,
                        target,
                        timestamp: now_ms(),
                    });
                }
                Err(e) => {
                    if let Some(reason) = self.command_failed(&mut failures, "set_pos", e) {
                        return reason;
                    }
                    if !self.cancel.sleep(self.config.poll_interval()).await {
                        return EndReason::Cancelled;
                    }
                    continue;
                }
            }

            if let Err(reason) = self.converge(target, &mut failures).await {
                return reason;
            }

            if !self.cancel.sleep(self.config.dwell()).await {
                return EndReason::Cancelled;
            }
        }
    }

    /// Poll until the reported position is within tolerance of `target`.
    async fn converge(&mut self, target: Position, failures: &mut Failures) -> Result<(), EndReason> {
        let mut polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EndReason::Cancelled);
            }

            match self.channel.get_position().await {
                Ok(reported) => {
                    failures.command = 0;
                    polls += 1;

                    let error_deg = angular_error(target, reported);
                    debug!(session = %self.id, %reported, error_deg, "Position polled");
                    self.emit(TrackingEvent::PositionReported {
                        session: self.id,
                        target,
                        reported,
                        error_deg,
                        timestamp: now_ms(),
                    });

                    if error_deg < self.config.tolerance_deg {
                        info!(session = %self.id, %target, polls, "Converged");
                        self.emit(TrackingEvent::Converged {
                            session: self.id,
                            target,
                            polls,
                            timestamp: now_ms(),
                        });
                        return Ok(());
                    }
                }
                Err(e) => {
                    if let Some(reason) = self.command_failed(failures, "get_pos", e) {
                        return Err(reason);
                    }
                }
            }

            if !self.cancel.sleep(self.config.poll_interval()).await {
                return Err(EndReason::Cancelled);
            }
        }
    }

    fn source_failed(&self, failures: &mut Failures, err: SourceError) -> Option<EndReason> {
        failures.source += 1;
        let consecutive = failures.source;
        let policy = &self.config.retry;

        warn!(session = %self.id, error = %err, consecutive, "Position source failed");
        self.emit(TrackingEvent::SourceFailed {
            session: self.id,
            error: err.to_string(),
            consecutive,
            timestamp: now_ms(),
        });

        if consecutive == policy.degraded_after {
            warn!(session = %self.id, consecutive, "Tracking degraded");
            self.emit(TrackingEvent::Degraded {
                session: self.id,
                consecutive_failures: consecutive,
                timestamp: now_ms(),
            });
        }

        match policy.abandon_after {
            Some(limit) if consecutive >= limit => Some(EndReason::SourceAbandoned),
            _ => None,
        }
    }

    fn command_failed(&self, failures: &mut Failures, command: &str, err: RotatorError) -> Option<EndReason> {
        match err {
            RotatorError::TransportClosed => return Some(EndReason::TransportClosed),
            RotatorError::MalformedResponse(ref detail) => {
                error!(session = %self.id, command, detail = %detail, "Unexpected rotator answer");
                return Some(EndReason::ProtocolMismatch);
            }
            _ => {}
        }

        failures.command += 1;
        let consecutive = failures.command;

        warn!(session = %self.id, command, error = %err, consecutive, "Rotator command failed");
        self.emit(TrackingEvent::CommandFailed {
            session: self.id,
            command: command.to_string(),
            error: err.to_string(),
            consecutive,
            timestamp: now_ms(),
        });

        match self.config.retry.max_command_failures {
            Some(limit) if consecutive >= limit => Some(EndReason::DeviceUnresponsive),
            _ => None,
        }
    }

    fn emit(&self, event: TrackingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
