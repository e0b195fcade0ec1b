//! Integration tests for `ConnectionManager` against a local WebSocket
//! server.
//!
//! Each test binds a throwaway `tokio-tungstenite` server on loopback and
//! drives the manager through connect, send, close and reconnect paths.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use batchgen_client::events::Inbound;
use batchgen_client::messages::OutboundCommand;
use batchgen_client::{
    ConnectionEvent, ConnectionManager, ConnectionState, Endpoint, ReconnectPolicy, Transport,
};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Bind a loopback server running `handler` for every accepted socket.
/// Returns the socket URL and the number of accepted connections.
async fn spawn_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(handler(index, ws));
        }
    });

    (format!("ws://{addr}/v1/generation/batchCopy"), accepted)
}

/// Keep the socket open until the client goes away.
async fn drain(mut ws: ServerSocket) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        max_attempts,
    }
}

fn manager(url: &str, policy: ReconnectPolicy) -> (ConnectionManager, mpsc::UnboundedReceiver<Inbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(Endpoint::new(url).unwrap(), policy, Duration::from_secs(2), tx);
    (manager, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> ConnectionEvent {
    loop {
        let item = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a connection event")
            .expect("inbound channel closed");
        if let Inbound::Connection(event) = item {
            return event;
        }
    }
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> String {
    loop {
        let item = tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("inbound channel closed");
        if let Inbound::Frame(text) = item {
            return text;
        }
    }
}

// ---------------------------------------------------------------------------
// Test: open sends connection_test and forwards inbound frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_connection_test_and_forwards_frames() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    let (url, _) = spawn_server(move |_, mut ws| {
        let seen_tx = seen_tx.clone();
        async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = seen_tx.send(text);
            }
            ws.send(Message::Text(r#"{"type":"pong"}"#.into())).await.unwrap();
            drain(ws).await;
        }
    })
    .await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    let mut events = manager.subscribe();
    manager.connect();

    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);

    let hello = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    let hello: serde_json::Value = serde_json::from_str(&hello).unwrap();
    assert_eq!(hello["type"], "connection_test");
    assert_eq!(hello["client_info"]["url"], url.as_str());
    assert!(hello["client_info"]["client_id"].as_str().is_some_and(|id| !id.is_empty()));

    assert_eq!(next_frame(&mut rx).await, r#"{"type":"pong"}"#);

    manager.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: send() only transmits while connected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_requires_connection() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    let (url, _) = spawn_server(move |_, mut ws| {
        let seen_tx = seen_tx.clone();
        async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(text);
                }
            }
        }
    })
    .await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    let pause = OutboundCommand::Pause {
        queue_id: "q-1".into(),
    };
    assert!(!manager.send(&pause));

    manager.connect();
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);
    assert!(manager.send(&pause));

    let first = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert!(first.contains("connection_test"));
    let second = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    let second: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_eq!(second, serde_json::json!({"type": "pause", "queue_id": "q-1"}));

    manager.disconnect().await;
    assert!(!manager.send(&pause));
}

// ---------------------------------------------------------------------------
// Test: a normal closure does not reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let (url, accepted) = spawn_server(|_, mut ws| async move {
        let _ = ws.next().await;
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            }))
            .await;
        drain(ws).await;
    })
    .await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    manager.connect();

    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Disconnected {
            code: Some(1000),
            retry_in: None
        }
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ---------------------------------------------------------------------------
// Test: an abnormal closure reconnects and resets the attempt counter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abnormal_close_reconnects_and_resets_attempts() {
    let (url, accepted) = spawn_server(|index, mut ws| async move {
        if index == 0 {
            let _ = ws.next().await;
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Error,
                    reason: "internal".into(),
                }))
                .await;
        }
        drain(ws).await;
    })
    .await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    manager.connect();

    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Disconnected {
            code: Some(1011),
            retry_in: Some(Duration::from_millis(10))
        }
    );
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);

    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    manager.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: failed opens back off and give up after the budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_endpoint_exhausts_attempts() {
    // Bind and release a port so nothing is listening on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (manager, mut rx) = manager(&format!("ws://127.0.0.1:{port}/none"), fast_policy(2));
    manager.connect();

    let mut errors = 0;
    let mut retries = Vec::new();
    loop {
        match next_event(&mut rx).await {
            ConnectionEvent::Error { .. } => errors += 1,
            ConnectionEvent::Disconnected {
                retry_in: Some(delay),
                ..
            } => retries.push(delay),
            ConnectionEvent::Disconnected { retry_in: None, code } => assert_eq!(code, None),
            ConnectionEvent::MaxReconnectAttemptsReached { attempts } => {
                assert_eq!(attempts, 2);
                break;
            }
            ConnectionEvent::Connected => panic!("nothing should be listening"),
        }
    }

    assert_eq!(errors, 3);
    assert_eq!(retries, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ---------------------------------------------------------------------------
// Test: disconnect() closes normally and suppresses reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_sends_normal_close() {
    let (close_tx, mut close_rx) = mpsc::unbounded_channel::<Option<u16>>();
    let (url, accepted) = spawn_server(move |_, mut ws| {
        let close_tx = close_tx.clone();
        async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Close(frame) = msg {
                    let _ = close_tx.send(frame.map(|f| u16::from(f.code)));
                    break;
                }
            }
        }
    })
    .await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    manager.connect();
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);

    manager.disconnect().await;

    assert_matches!(
        tokio::time::timeout(WAIT, close_rx.recv()).await,
        Ok(Some(Some(1000)))
    );
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Disconnected {
            code: Some(1000),
            retry_in: None
        }
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ---------------------------------------------------------------------------
// Test: connect() while connected is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_when_connected_is_noop() {
    let (url, accepted) = spawn_server(|_, ws| drain(ws)).await;

    let (manager, mut rx) = manager(&url, fast_policy(5));
    manager.connect();
    assert_eq!(next_event(&mut rx).await, ConnectionEvent::Connected);

    manager.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);
    manager.disconnect().await;
}

// ---------------------------------------------------------------------------
// Test: a stalled handshake times out and counts as an abnormal closure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stalled_handshake_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        // Accept TCP but never answer the upgrade request.
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        Endpoint::new(&format!("ws://{addr}/v1/generation/batchCopy")).unwrap(),
        fast_policy(1),
        Duration::from_millis(50),
        tx,
    );
    manager.connect();

    assert_matches!(
        next_event(&mut rx).await,
        ConnectionEvent::Error { message } if message.contains("timed out after 50ms")
    );
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Disconnected {
            code: None,
            retry_in: Some(Duration::from_millis(10))
        }
    );
    assert_matches!(next_event(&mut rx).await, ConnectionEvent::Error { .. });
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::Disconnected {
            code: None,
            retry_in: None
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        ConnectionEvent::MaxReconnectAttemptsReached { attempts: 1 }
    );

    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
