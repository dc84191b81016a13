//! Upstream connection state machine

use serde::Serialize;

/// Lifecycle of the single upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Backoff elapsed (or first start); open the transport
    Connect,
    /// Transport is open; auth has been sent
    Opened,
    /// Provider acknowledged authentication
    Authenticated,
    /// Error, close, fatal error frame or keepalive failure
    Failed,
}

impl ConnectionState {
    /// Next state for an event, `None` if the event is not valid here
    pub fn next(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, Failed) => Some(Disconnected),
            (Disconnected, Connect) => Some(Connecting),
            (Connecting, Opened) => Some(Authenticating),
            (Authenticating, Authenticated) => Some(Subscribed),
            _ => None,
        }
    }

    /// Whether incremental subscribe/unsubscribe frames may be sent
    pub fn accepts_diffs(self) -> bool {
        self == ConnectionState::Subscribed
    }
}
