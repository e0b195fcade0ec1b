//! WebSocket endpoint of the batch generation job runner.
//!
//! [`Endpoint`] resolves the socket URL from the origin hosting the
//! admin application. Call [`open`] to establish a live
//! [`WsStream`] with a bounded handshake time.

use std::time::Duration;

use batchgen_core::protocol::ENDPOINT_PATH;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream for reading/writing frames.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Resolved WebSocket URL of the job runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    ws_url: String,
}

impl Endpoint {
    /// Use a `ws://` or `wss://` URL verbatim.
    pub fn new(ws_url: impl Into<String>) -> Result<Self, ConnectionError> {
        let ws_url = ws_url.into();
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "expected a ws:// or wss:// URL, got {ws_url}"
            )));
        }
        Ok(Self { ws_url })
    }

    /// Derive the socket URL from the hosting origin.
    ///
    /// The scheme is upgraded to its socket variant (`https` becomes
    /// `wss`), any path on the origin is dropped, and the fixed runner
    /// path is appended. Socket URLs are accepted verbatim.
    pub fn from_origin(origin: &str) -> Result<Self, ConnectionError> {
        let origin = origin.trim();
        if origin.starts_with("ws://") || origin.starts_with("wss://") {
            return Self::new(origin);
        }

        let (scheme, rest) = if let Some(rest) = origin.strip_prefix("https://") {
            ("wss", rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            ("ws", rest)
        } else {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "unsupported origin scheme: {origin}"
            )));
        };

        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "origin has no host: {origin}"
            )));
        }

        Ok(Self {
            ws_url: format!("{scheme}://{host}{ENDPOINT_PATH}"),
        })
    }

    pub fn url(&self) -> &str {
        &self.ws_url
    }
}

/// Open the runner socket, aborting when `timeout` elapses first.
pub async fn open(endpoint: &Endpoint, timeout: Duration) -> Result<WsStream, ConnectionError> {
    match tokio::time::timeout(timeout, connect_async(endpoint.url())).await {
        Ok(Ok((ws_stream, _response))) => {
            tracing::info!(url = %endpoint.url(), "Connected to job runner");
            Ok(ws_stream)
        }
        Ok(Err(e)) => Err(ConnectionError::Connection(format!(
            "Failed to connect to {}: {e}",
            endpoint.url()
        ))),
        Err(_) => Err(ConnectionError::Timeout(timeout)),
    }
}

/// Errors that can occur when establishing the socket.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The configured endpoint cannot be turned into a socket URL.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not finish in time.
    #[error("Connection attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}
