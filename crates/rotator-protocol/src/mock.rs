//! Mock Rotator
//!
//! In-memory stand-in for a rotctl console, for tests and `--mock` dry runs.
//! Answers get_pos with the reported position, accepts everything else with
//! an empty answer, and records every line it receives.

use crate::transport::DeviceTransport;
use crate::{Position, Result, RotatorError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct MockState {
    reported: Position,
    follow_commands: bool,
    echo: bool,
    silent: bool,
    connected: bool,
    disconnect_after: Option<usize>,
    commands: Vec<String>,
    answers: VecDeque<String>,
    held: VecDeque<String>,
}

/// Test-side handle to a [`MockTransport`], usable after the transport has
/// been moved into a channel.
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every line written so far, oldest first
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Number of lines written whose verb is `verb`
    pub fn count(&self, verb: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(verb))
            .count()
    }

    pub fn reported(&self) -> Position {
        self.lock().reported
    }

    pub fn set_reported(&self, position: Position) {
        self.lock().reported = position;
    }

    /// Stop answering; reads hang until the caller's deadline fires.
    ///
    /// Answers to commands received while silent are held back and become
    /// readable, in order, once the mock speaks again.
    pub fn set_silent(&self, silent: bool) {
        let mut state = self.lock();
        state.silent = silent;
        if !silent {
            let held: Vec<String> = state.held.drain(..).collect();
            state.answers.extend(held);
        }
    }

    /// Drop the connection now.
    pub fn disconnect(&self) {
        self.lock().connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    /// Mock rotator parked at azimuth 0, elevation 0, answering without echo.
    pub fn new() -> Self {
        Self {
            handle: MockHandle {
                state: Arc::new(Mutex::new(MockState {
                    reported: Position::new(0.0, 0.0),
                    follow_commands: false,
                    echo: false,
                    silent: false,
                    connected: true,
                    disconnect_after: None,
                    commands: Vec::new(),
                    answers: VecDeque::new(),
                    held: VecDeque::new(),
                })),
            },
        }
    }

    /// Report this position for every get_pos.
    pub fn with_reported(self, position: Position) -> Self {
        self.handle.lock().reported = position;
        self
    }

    /// Jump straight to every commanded position.
    pub fn following_commands(self) -> Self {
        self.handle.lock().follow_commands = true;
        self
    }

    /// Echo each command before its answer, as a pty-attached console does.
    pub fn with_echo(self) -> Self {
        self.handle.lock().echo = true;
        self
    }

    /// Accept `lines` commands, then drop the connection.
    pub fn disconnect_after(self, lines: usize) -> Self {
        self.handle.lock().disconnect_after = Some(lines);
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn answer_for(state: &mut MockState, line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    let answer = match parts.next() {
        Some("p") => format!(
            "Azimuth: {:?}\r\nElevation: {:?}",
            state.reported.azimuth, state.reported.elevation
        ),
        Some("P") => {
            let args: Vec<f64> = parts.filter_map(|t| t.parse().ok()).collect();
            if args.len() != 2 || args.iter().any(|v| !v.is_finite()) {
                return Some("set_pos: error = Invalid parameter".to_string());
            }
            if state.follow_commands {
                state.reported = Position::new(args[0], args[1]);
            }
            String::new()
        }
        Some("K") => {
            if state.follow_commands {
                state.reported = Position::new(0.0, 0.0);
            }
            String::new()
        }
        Some("_") => "Info: Mock rotator".to_string(),
        Some("q") => {
            state.connected = false;
            return None;
        }
        _ => String::new(),
    };
    Some(answer)
}

impl DeviceTransport for MockTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = self.handle.lock();
        if !state.connected {
            return Err(RotatorError::TransportClosed);
        }
        if let Some(limit) = state.disconnect_after {
            if state.commands.len() >= limit {
                state.connected = false;
                return Err(RotatorError::TransportClosed);
            }
        }

        state.commands.push(line.to_string());

        if let Some(answer) = answer_for(&mut state, line) {
            let framed = if state.echo {
                format!("{line}\r\n{answer}\r\n")
            } else {
                format!("{answer}\r\n")
            };
            if state.silent {
                state.held.push_back(framed);
            } else {
                state.answers.push_back(framed);
            }
        }
        Ok(())
    }

    async fn read_until_prompt(&mut self) -> Result<String> {
        let next = {
            let mut state = self.handle.lock();
            if !state.connected {
                return Err(RotatorError::TransportClosed);
            }
            state.answers.pop_front()
        };

        match next {
            Some(answer) => Ok(answer),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.handle.disconnect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_pos_answer() {
        let mut mock = MockTransport::new().with_reported(Position::new(120.0, 30.0));
        mock.write_line("p").await.unwrap();
        let answer = mock.read_until_prompt().await.unwrap();
        assert_eq!(answer, "Azimuth: 120.0\r\nElevation: 30.0\r\n");
    }

    #[tokio::test]
    async fn test_following_mock_moves_on_set_pos() {
        let mut mock = MockTransport::new().following_commands();
        let handle = mock.handle();

        mock.write_line("P 45.5 10").await.unwrap();
        mock.read_until_prompt().await.unwrap();

        assert_eq!(handle.reported(), Position::new(45.5, 10.0));
        assert_eq!(handle.count("P"), 1);
        assert_eq!(handle.commands(), vec!["P 45.5 10".to_string()]);
    }

    #[tokio::test]
    async fn test_silent_mock_holds_answers() {
        let mut mock = MockTransport::new().with_reported(Position::new(5.0, 6.0));
        let handle = mock.handle();
        handle.set_silent(true);
        mock.write_line("p").await.unwrap();

        let early = tokio::time::timeout(std::time::Duration::from_millis(10), mock.read_until_prompt()).await;
        assert!(early.is_err());

        handle.set_silent(false);
        assert_eq!(mock.read_until_prompt().await.unwrap(), "Azimuth: 5.0\r\nElevation: 6.0\r\n");
    }

    #[tokio::test]
    async fn test_disconnect_after() {
        let mut mock = MockTransport::new().disconnect_after(1);
        mock.write_line("S").await.unwrap();
        let err = mock.write_line("S").await.unwrap_err();
        assert!(matches!(err, RotatorError::TransportClosed));
    }

    #[tokio::test]
    async fn test_exit_closes() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.write_line("q").await.unwrap();
        assert!(!handle.is_connected());
        assert!(matches!(
            mock.read_until_prompt().await.unwrap_err(),
            RotatorError::TransportClosed
        ));
    }
}
