//! Chat connection supervision.
//!
//! One `SessionCoordinator` owns the connection state. Transport callbacks
//! report events to it and it answers with the action to take, so two close
//! events can never schedule two overlapping reconnects.

use std::time::Duration;
use log::{info, warn};

const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: f64 = 1.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    /// Connection dropped; `restartable` is false when the session was logged out
    Closed { restartable: bool },
    /// A scheduled reconnect is now being attempted
    ReconnectStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    None,
    /// Reconnect after the given delay
    Reconnect(Duration),
    Stop,
}

/// Delay before reconnect attempt number `attempt` (0-based)
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = BACKOFF_FACTOR.powi(attempt.min(64) as i32);
    let secs = (BASE_BACKOFF.as_secs_f64() * factor).min(MAX_BACKOFF.as_secs_f64());
    Duration::from_secs_f64(secs)
}

#[derive(Debug)]
pub struct SessionCoordinator {
    state: ConnectionState,
    attempt: u32,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        SessionCoordinator {
            state: ConnectionState::Connecting,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply `event` and return what the supervisor should do next
    pub fn on_event(&mut self, event: SessionEvent) -> SessionAction {
        match (self.state, event) {
            (ConnectionState::LoggedOut, _) => SessionAction::Stop,

            (_, SessionEvent::Opened) => {
                info!("✅ Connected");
                self.state = ConnectionState::Connected;
                self.attempt = 0;
                SessionAction::None
            }

            (_, SessionEvent::Closed { restartable: false }) => {
                warn!("Session logged out, not reconnecting");
                self.state = ConnectionState::LoggedOut;
                SessionAction::Stop
            }

            // A reconnect is already scheduled or running
            (ConnectionState::Reconnecting { .. }, SessionEvent::Closed { restartable: true }) => SessionAction::None,

            (_, SessionEvent::Closed { restartable: true }) => {
                let delay = backoff_delay(self.attempt);
                self.state = ConnectionState::Reconnecting { attempt: self.attempt };
                self.attempt = self.attempt.saturating_add(1);
                info!("🔁 Connection closed, reconnecting in {:.1}s", delay.as_secs_f64());
                SessionAction::Reconnect(delay)
            }

            (ConnectionState::Reconnecting { .. }, SessionEvent::ReconnectStarted) => {
                self.state = ConnectionState::Connecting;
                SessionAction::None
            }

            (_, SessionEvent::ReconnectStarted) => SessionAction::None,
        }
    }
}
