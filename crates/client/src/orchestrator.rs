//! Client facade.
//!
//! [`TaskOrchestrator`] wires the connection manager, router, controller
//! and persistence together. Frames and connectivity events reach one
//! dispatch task through a single ordered channel; that task is the only
//! place inbound traffic mutates the controller, always under the
//! controller mutex. Commands from the caller take the same mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use batchgen_core::{
    BatchCopyParams, ExtractedEntity, GeneratedArticle, LaunchRequest, TaskIdentity, TaskSnapshot,
    TaskStats, TaskStatus,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::controller::{CommandError, StopOutcome, TaskController};
use crate::events::{ConnectionEvent, ConnectionState, Inbound};
use crate::manager::ConnectionManager;
use crate::notify::Notifier;
use crate::observers::Subscription;
use crate::persistence::{PersistenceStore, Storage};
use crate::router::MessageRouter;
use crate::transport::Transport;

/// How long `shutdown` waits for the dispatch task.
const DISPATCH_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct TaskOrchestrator {
    controller: Arc<Mutex<TaskController>>,
    connection: Arc<ConnectionManager>,
    router: MessageRouter,
    stop_ack_timeout: Duration,
    /// Cancels the dispatch task and any armed stop watchdogs.
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    /// Build the client and restore persisted state.
    ///
    /// State is restored before any connection exists; call
    /// [`connect`](Self::connect) afterwards. Must run inside a Tokio
    /// runtime.
    pub fn new(config: &ClientConfig, storage: Arc<dyn Storage>, notifier: Arc<dyn Notifier>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ConnectionManager::new(
            config.endpoint.clone(),
            config.reconnect.clone(),
            config.connect_timeout,
            inbound_tx,
        ));

        let transport: Arc<dyn Transport> = connection.clone();
        let mut controller = TaskController::new(transport, PersistenceStore::new(storage), notifier);
        controller.restore();
        let controller = Arc::new(Mutex::new(controller));

        let router = MessageRouter::new();
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(run_dispatch_loop(
            inbound_rx,
            router.clone(),
            Arc::clone(&controller),
            cancel.clone(),
        ));

        tracing::info!(
            url = %config.endpoint.url(),
            stop_ack_timeout_ms = config.stop_ack_timeout.as_millis() as u64,
            "Task orchestrator ready",
        );

        Self {
            controller,
            connection,
            router,
            stop_ack_timeout: config.stop_ack_timeout,
            cancel,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskController> {
        lock(&self.controller)
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Wait up to `timeout` for the socket to be open.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let mut state = self.connection.watch_state();
        let result =
            tokio::time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Connected)).await;
        matches!(result, Ok(Ok(_)))
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub fn start(&self, request: &LaunchRequest) -> Result<(), CommandError> {
        self.lock().start(request)
    }

    pub fn pause_task(&self) -> Result<(), CommandError> {
        self.lock().pause_task()
    }

    pub fn resume_task(&self) -> Result<(), CommandError> {
        self.lock().resume_task()
    }

    /// Request a stop and arm the acknowledgment watchdog.
    pub fn stop_task(&self) -> StopOutcome {
        let outcome = self.lock().stop_task();

        if let StopOutcome::AwaitingAck { generation } = outcome {
            let controller = Arc::clone(&self.controller);
            let cancel = self.cancel.clone();
            let timeout = self.stop_ack_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        lock(&controller).handle_stop_timeout(generation);
                    }
                }
            });
        }
        outcome
    }

    /// Observe every well-formed inbound frame.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.router.subscribe(observer)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Run `f` against the controller under its lock.
    pub fn with_controller<R>(&self, f: impl FnOnce(&TaskController) -> R) -> R {
        f(&self.lock())
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status()
    }

    pub fn status_label(&self) -> &'static str {
        self.lock().status_label()
    }

    pub fn has_active_task(&self) -> bool {
        self.lock().has_active_task()
    }

    pub fn is_resumable(&self) -> bool {
        self.lock().is_resumable()
    }

    pub fn identity(&self) -> TaskIdentity {
        self.lock().identity().clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock().progress()
    }

    pub fn stats(&self) -> TaskStats {
        self.lock().stats()
    }

    pub fn config(&self) -> Option<BatchCopyParams> {
        self.lock().config().cloned()
    }

    pub fn entities(&self) -> Vec<ExtractedEntity> {
        self.lock().entities().to_vec()
    }

    pub fn articles(&self) -> Vec<GeneratedArticle> {
        self.lock().articles().to_vec()
    }

    pub fn current_content(&self) -> String {
        self.lock().current_content().to_string()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.lock().snapshot().clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Close the socket, stop watchdogs and the dispatch task.
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        self.cancel.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if tokio::time::timeout(DISPATCH_SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Dispatch task did not exit in time");
            }
        }
        tracing::info!("Task orchestrator shut down");
    }
}

impl Drop for TaskOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(controller: &Mutex<TaskController>) -> MutexGuard<'_, TaskController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume frames and connection events in arrival order.
///
/// Observers run before the controller lock is taken, so they may call
/// back into the orchestrator's accessors.
async fn run_dispatch_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    router: MessageRouter,
    controller: Arc<Mutex<TaskController>>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = inbound_rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        match item {
            Inbound::Frame(text) => {
                let Some((raw, msg)) = router.parse(&text) else {
                    continue;
                };
                router.notify_observers(&raw);
                router.dispatch(&msg, &mut lock(&controller));
            }
            Inbound::Connection(event) => {
                lock(&controller).on_connection_event(&event);
            }
        }
    }
    tracing::debug!("Dispatch loop exited");
}
