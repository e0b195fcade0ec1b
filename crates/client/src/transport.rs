use crate::messages::OutboundCommand;

/// Outbound side of the runner connection, as seen by the task controller.
///
/// Implemented by [`ConnectionManager`](crate::manager::ConnectionManager);
/// tests and alternative drivers can supply their own.
pub trait Transport: Send + Sync {
    /// True while the socket is open.
    fn is_connected(&self) -> bool;

    /// Transmit `command` if connected. Never queues; returns whether the
    /// command was handed to the socket.
    fn send(&self, command: &OutboundCommand) -> bool;
}
