//! Broker connection state machine.

use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Where the broker connection currently stands.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected (drop)
///                                   ^              |
///                                   |              v
///                                   +------ Reconnecting -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted; needs a manual restart
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { .. } => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// One state change, as delivered to transition subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Transitions kept for slow subscribers before they start lagging.
const TRANSITION_BACKLOG: usize = 64;

/// Current state plus a lossless feed of every change.
///
/// The watch side coalesces, which suits "what is the state now". The
/// broadcast side keeps each step so the history can be replayed.
#[derive(Debug)]
pub(crate) struct StateTracker {
    current: watch::Sender<ConnectionState>,
    changes: broadcast::Sender<Transition>,
}

impl StateTracker {
    pub fn new(initial: ConnectionState) -> (Self, watch::Receiver<ConnectionState>) {
        let (current, rx) = watch::channel(initial);
        let (changes, _) = broadcast::channel(TRANSITION_BACKLOG);
        (Self { current, changes }, rx)
    }

    pub fn current(&self) -> ConnectionState {
        *self.current.borrow()
    }

    pub fn changes(&self) -> broadcast::Sender<Transition> {
        self.changes.clone()
    }

    /// Move to `next` and log the transition with enough detail to replay it.
    pub fn transition(&self, next: ConnectionState) {
        let prev = self.current.send_replace(next);
        if prev == next {
            return;
        }
        // No subscribers is fine
        let _ = self.changes.send(Transition {
            from: prev,
            to: next,
        });

        let (attempt, delay) = match next {
            ConnectionState::Reconnecting { attempt, delay } => (attempt, delay.as_secs()),
            _ => (0, 0),
        };
        if next.is_failed() {
            log::error!(
                "broker state transition from={} to={} attempt={} delay_secs={}",
                prev,
                next,
                attempt,
                delay
            );
        } else {
            log::info!(
                "broker state transition from={} to={} attempt={} delay_secs={}",
                prev,
                next,
                attempt,
                delay
            );
        }
    }
}
