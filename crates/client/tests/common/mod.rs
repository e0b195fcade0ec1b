#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use batchgen_client::messages::OutboundCommand;
use batchgen_client::persistence::STORAGE_KEY;
use batchgen_client::{MemoryStorage, Notifier, PersistenceStore, Storage, TaskController, Transport};
use batchgen_core::TaskSnapshot;

/// Transport that records every command instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<OutboundCommand>>,
}

impl RecordingTransport {
    pub fn connected() -> Arc<Self> {
        let transport = Self::default();
        transport.set_connected(true);
        Arc::new(transport)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundCommand> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, command: &OutboundCommand) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.sent.lock().unwrap().push(command.clone());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
    Info,
    Warning,
}

/// Notifier that keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingNotifier {
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }

    fn push(&self, level: Level, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}

impl Notifier for RecordingNotifier {
    fn notify_success(&self, message: &str) {
        self.push(Level::Success, message);
    }

    fn notify_error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn notify_info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn notify_warning(&self, message: &str) {
        self.push(Level::Warning, message);
    }
}

/// A controller wired to recording collaborators and in-memory storage.
pub struct Harness {
    pub controller: TaskController,
    pub transport: Arc<RecordingTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: MemoryStorage,
}

impl Harness {
    pub fn connected() -> Self {
        Self::with(RecordingTransport::connected(), MemoryStorage::new())
    }

    pub fn with(transport: Arc<RecordingTransport>, storage: MemoryStorage) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = TaskController::new(
            transport.clone(),
            PersistenceStore::new(Arc::new(storage.clone())),
            notifier.clone(),
        );
        Self {
            controller,
            transport,
            notifier,
            storage,
        }
    }

    /// The snapshot currently in storage, if any.
    pub fn stored(&self) -> Option<TaskSnapshot> {
        self.storage
            .get(STORAGE_KEY)
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }
}
