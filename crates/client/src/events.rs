//! Connectivity events emitted by the connection manager.
//!
//! These are the only way the rest of the client learns about socket
//! health. They are broadcast to external subscribers and also fed,
//! in order with inbound frames, to the task dispatch loop.

use std::time::Duration;

use serde::Serialize;

/// Socket health as seen by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A connectivity change on the runner socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The handshake completed; the retry counter has been reset.
    Connected,

    /// The socket closed. `retry_in` is set when a reconnect is scheduled.
    Disconnected {
        code: Option<u16>,
        retry_in: Option<Duration>,
    },

    /// An open attempt or an established session failed.
    Error { message: String },

    /// The retry budget is exhausted; no further attempts will be made.
    MaxReconnectAttemptsReached { attempts: u32 },
}

/// Item delivered to the task dispatch loop.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A raw text frame from the runner, in arrival order.
    Frame(String),
    /// A connectivity change.
    Connection(ConnectionEvent),
}
