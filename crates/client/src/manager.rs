//! Runner connection manager.
//!
//! [`ConnectionManager`] owns the single socket to the job runner. Each
//! [`connect`](ConnectionManager::connect) spawns a supervisor task
//! (open -> pump -> reconnect loop) that keeps the connection alive
//! under the [`ReconnectPolicy`]. Connectivity changes are published
//! as [`ConnectionEvent`]s; call [`ConnectionManager::subscribe`] to
//! receive them. The manager never touches task state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{self, Endpoint};
use crate::events::{ConnectionEvent, ConnectionState, Inbound};
use crate::messages::{ClientInfo, OutboundCommand};
use crate::processor::{self, SessionEnd};
use crate::reconnect::{self, ReconnectDecision, ReconnectPolicy, CLOSE_NORMAL};
use crate::transport::Transport;

/// Broadcast channel capacity for connectivity events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the supervisor to flush its Close frame.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handshake timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Manages the persistent connection to the job runner.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    /// Identifies this client in `connection_test` frames.
    client_id: String,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inner: Mutex<Inner>,
}

/// Mutable bookkeeping. `generation` invalidates supervisors that were
/// torn down by a later `connect` or `disconnect`.
#[derive(Default)]
struct Inner {
    generation: u64,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    ///
    /// Inbound frames and connectivity events are delivered, in order,
    /// on `inbound_tx`.
    pub fn new(
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        inbound_tx: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                endpoint,
                policy,
                connect_timeout,
                client_id: uuid::Uuid::new_v4().to_string(),
                state_tx,
                event_tx,
                inbound_tx,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to connectivity events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Retries made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    /// Open the connection in the background.
    ///
    /// No-op when already connected. Any previous supervisor (including
    /// one waiting to retry) is torn down and the retry budget is reset.
    pub fn connect(&self) {
        if self.state() == ConnectionState::Connected {
            tracing::debug!("WebSocket already connected");
            return;
        }

        let mut inner = self.shared.lock();
        if let Some(previous) = inner.cancel.take() {
            previous.cancel();
        }
        inner.outbound = None;
        inner.generation += 1;
        inner.attempts = 0;

        let generation = inner.generation;
        let cancel = CancellationToken::new();
        inner.cancel = Some(cancel.clone());

        let shared = Arc::clone(&self.shared);
        inner.task = Some(tokio::spawn(async move {
            tracing::info!(url = %shared.endpoint.url(), generation, "Starting connection task");
            shared.run_connection_loop(generation, cancel).await;
            tracing::debug!(generation, "Connection task exited");
        }));
    }

    /// Close the socket with the normal-closure code and suppress
    /// reconnection.
    pub async fn disconnect(&self) {
        let task = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.outbound = None;
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
            }

            let previous = self.shared.state_tx.send_replace(ConnectionState::Disconnected);
            if previous != ConnectionState::Disconnected {
                self.shared.emit(ConnectionEvent::Disconnected {
                    code: Some(CLOSE_NORMAL),
                    retry_in: None,
                });
            }
            inner.task.take()
        };

        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Connection task did not exit in time");
            }
        }
        tracing::info!("WebSocket disconnected");
    }
}

impl Transport for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn send(&self, command: &OutboundCommand) -> bool {
        let inner = self.shared.lock();
        let Some(tx) = inner.outbound.as_ref().filter(|_| self.is_connected()) else {
            tracing::warn!(command = command.kind(), "WebSocket not connected, command not sent");
            return false;
        };

        match serde_json::to_string(command) {
            Ok(text) => {
                tracing::debug!(command = command.kind(), "Sending command");
                tx.send(Message::Text(text)).is_ok()
            }
            Err(e) => {
                tracing::error!(command = command.kind(), error = %e, "Failed to encode command");
                false
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(cancel) = self.shared.lock().cancel.take() {
            cancel.cancel();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine for both channels.
        let _ = self.event_tx.send(event.clone());
        let _ = self.inbound_tx.send(Inbound::Connection(event));
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Run `f` under the lock if `generation` is still current.
    fn if_current<R>(&self, generation: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        (inner.generation == generation).then(|| f(&mut inner))
    }

    /// Core supervisor loop: open -> pump -> decide -> (wait -> open).
    ///
    /// Runs until a normal closure, exhaustion of the retry budget, or
    /// cancellation.
    async fn run_connection_loop(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        loop {
            if self
                .if_current(generation, |_| self.set_state(ConnectionState::Connecting))
                .is_none()
            {
                return;
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                result = client::open(&self.endpoint, self.connect_timeout) => result,
            };

            let code = match opened {
                Ok(ws_stream) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let registered = self.if_current(generation, |inner| {
                        inner.attempts = 0;
                        inner.outbound = Some(tx.clone());
                        self.set_state(ConnectionState::Connected);
                        self.emit(ConnectionEvent::Connected);
                    });
                    if registered.is_none() {
                        return;
                    }

                    self.send_connection_test(&tx);
                    drop(tx);

                    let end =
                        processor::run_session(ws_stream, rx, &self.inbound_tx, &cancel).await;
                    if end == SessionEnd::Cancelled {
                        return;
                    }

                    let current = self.if_current(generation, |inner| {
                        inner.outbound = None;
                        self.set_state(ConnectionState::Disconnected);
                        if let SessionEnd::Failed(reason) = &end {
                            self.emit(ConnectionEvent::Error {
                                message: reason.clone(),
                            });
                        }
                    });
                    if current.is_none() {
                        return;
                    }
                    end.close_code()
                }
                Err(e) => {
                    tracing::warn!(url = %self.endpoint.url(), error = %e, "Connection attempt failed");
                    let current = self.if_current(generation, |_| {
                        self.set_state(ConnectionState::Disconnected);
                        self.emit(ConnectionEvent::Error {
                            message: e.to_string(),
                        });
                    });
                    if current.is_none() {
                        return;
                    }
                    None
                }
            };

            let decision = self.if_current(generation, |inner| {
                let decision = reconnect::decide(code, inner.attempts, &self.policy);
                match decision {
                    ReconnectDecision::Stop => {
                        tracing::info!(?code, "WebSocket closed normally");
                        self.emit(ConnectionEvent::Disconnected {
                            code,
                            retry_in: None,
                        });
                    }
                    ReconnectDecision::Retry { attempt, delay } => {
                        inner.attempts = attempt;
                        tracing::info!(
                            ?code,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Scheduling reconnect",
                        );
                        self.emit(ConnectionEvent::Disconnected {
                            code,
                            retry_in: Some(delay),
                        });
                    }
                    ReconnectDecision::GiveUp { attempts } => {
                        tracing::error!(attempts, "Reconnect attempts exhausted");
                        self.emit(ConnectionEvent::Disconnected {
                            code,
                            retry_in: None,
                        });
                        self.emit(ConnectionEvent::MaxReconnectAttemptsReached { attempts });
                    }
                }
                decision
            });

            match decision {
                Some(ReconnectDecision::Retry { delay, .. }) => {
                    if !reconnect::wait_before_retry(delay, &cancel).await {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn send_connection_test(&self, tx: &mpsc::UnboundedSender<Message>) {
        let command = OutboundCommand::ConnectionTest {
            timestamp: chrono::Utc::now().timestamp_millis(),
            client_info: ClientInfo {
                user_agent: concat!("batchgen/", env!("CARGO_PKG_VERSION")).to_string(),
                url: self.endpoint.url().to_string(),
                client_id: self.client_id.clone(),
            },
        };

        match serde_json::to_string(&command) {
            Ok(text) => {
                let _ = tx.send(Message::Text(text));
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode connection test"),
        }
    }
}
