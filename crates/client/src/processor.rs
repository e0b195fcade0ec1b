//! WebSocket session pump.
//!
//! Drives one established connection: forwards queued outbound frames
//! to the socket and hands every inbound text frame, in arrival order,
//! to the dispatch channel. Returns when the socket closes, fails, or
//! the session is cancelled.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::WsStream;
use crate::events::Inbound;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent a Close frame (with its code, when present).
    Closed { code: Option<u16> },
    /// The socket errored or the stream ended without a Close frame.
    Failed(String),
    /// The local side tore the session down.
    Cancelled,
}

impl SessionEnd {
    /// Close code to feed the reconnect policy. Failures have none.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code } => *code,
            Self::Failed(_) => None,
            Self::Cancelled => Some(u16::from(CloseCode::Normal)),
        }
    }
}

/// Pump frames until the session ends.
///
/// On cancellation a Close frame with the normal-closure code is sent
/// before returning.
pub async fn run_session(
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    inbound: &mpsc::UnboundedSender<Inbound>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                }));
                if let Err(e) = sink.send(close).await {
                    tracing::debug!(error = %e, "Close frame not delivered");
                }
                return SessionEnd::Cancelled;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    tracing::error!(error = %e, "Failed to send frame");
                    return SessionEnd::Failed(e.to_string());
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(Inbound::Frame(text)).is_err() {
                            tracing::warn!("Dispatch loop gone, dropping inbound frame");
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::trace!(len = bytes.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Job runner closed WebSocket");
                        return SessionEnd::Closed {
                            code: frame.map(|f| u16::from(f.code)),
                        };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket receive error");
                        return SessionEnd::Failed(e.to_string());
                    }
                    None => {
                        tracing::info!("WebSocket stream exhausted");
                        return SessionEnd::Failed("stream ended without close frame".into());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_for_reconnect_policy() {
        assert_eq!(SessionEnd::Closed { code: Some(1006) }.close_code(), Some(1006));
        assert_eq!(SessionEnd::Closed { code: None }.close_code(), None);
        assert_eq!(SessionEnd::Failed("x".into()).close_code(), None);
        assert_eq!(SessionEnd::Cancelled.close_code(), Some(1000));
    }
}
