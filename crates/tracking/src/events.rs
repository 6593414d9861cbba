//! Tracking telemetry
//!
//! Events are broadcast to any number of observers (UI, logs, JSON lines on
//! stdout). Timestamps are unix milliseconds.

use rotator_protocol::Position;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `stop()` was called
    Cancelled,
    /// The source ran out of targets
    SourceExhausted,
    /// Too many consecutive source failures
    SourceAbandoned,
    /// Connection to the rotator lost
    TransportClosed,
    /// The rotator answered something unparseable
    ProtocolMismatch,
    /// Too many consecutive command failures
    DeviceUnresponsive,
}

impl EndReason {
    /// Ended by request or by running out of work, not by a fault
    pub fn is_normal(&self) -> bool {
        matches!(self, EndReason::Cancelled | EndReason::SourceExhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackingEvent {
    SessionStarted {
        session: Uuid,
        source: String,
        tolerance_deg: f64,
        timestamp: i64,
    },
    TargetCommanded {
        session: Uuid,
        target: Position,
        timestamp: i64,
    },
    PositionReported {
        session: Uuid,
        target: Position,
        reported: Position,
        error_deg: f64,
        timestamp: i64,
    },
    Converged {
        session: Uuid,
        target: Position,
        polls: u32,
        timestamp: i64,
    },
    SourceFailed {
        session: Uuid,
        error: String,
        consecutive: u32,
        timestamp: i64,
    },
    Degraded {
        session: Uuid,
        consecutive_failures: u32,
        timestamp: i64,
    },
    CommandFailed {
        session: Uuid,
        command: String,
        error: String,
        consecutive: u32,
        timestamp: i64,
    },
    SessionEnded {
        session: Uuid,
        reason: EndReason,
        timestamp: i64,
    },
}

impl TrackingEvent {
    pub fn session(&self) -> Uuid {
        match self {
            TrackingEvent::SessionStarted { session, .. }
            | TrackingEvent::TargetCommanded { session, .. }
            | TrackingEvent::PositionReported { session, .. }
            | TrackingEvent::Converged { session, .. }
            | TrackingEvent::SourceFailed { session, .. }
            | TrackingEvent::Degraded { session, .. }
            | TrackingEvent::CommandFailed { session, .. }
            | TrackingEvent::SessionEnded { session, .. } => *session,
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let session = Uuid::new_v4();
        let event = TrackingEvent::SessionEnded {
            session,
            reason: EndReason::TransportClosed,
            timestamp: 1_700_000_000_000,
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SessionEnded");
        assert_eq!(json["reason"], "transport_closed");
        assert_eq!(json["session"], session.to_string());

        let back: TrackingEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.session(), session);
    }

    #[test]
    fn test_normal_end_reasons() {
        assert!(EndReason::Cancelled.is_normal());
        assert!(EndReason::SourceExhausted.is_normal());
        assert!(!EndReason::ProtocolMismatch.is_normal());
    }
}
