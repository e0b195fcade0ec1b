//! Real-time client for the batch generation job runner.
//!
//! Keeps one WebSocket connection to the runner, drives the lifecycle of
//! a single batch generation task (start, pause, resume, stop), routes
//! server-pushed messages to state transitions, and persists task state
//! so it survives restarts and transient disconnects.
//!
//! [`TaskOrchestrator`] is the entry point. The components it wires
//! together are public for embedding and testing.

pub mod client;
pub mod config;
pub mod controller;
pub mod events;
pub mod manager;
pub mod messages;
pub mod notify;
pub mod observers;
pub mod orchestrator;
pub mod persistence;
pub mod processor;
pub mod reconnect;
pub mod router;
pub mod transport;

pub use client::{ConnectionError, Endpoint};
pub use config::{ClientConfig, ConfigError};
pub use controller::{CommandError, StopOutcome, StopReason, TaskController};
pub use events::{ConnectionEvent, ConnectionState};
pub use manager::ConnectionManager;
pub use notify::{Notifier, TracingNotifier};
pub use observers::{ObserverRegistry, Subscription};
pub use orchestrator::TaskOrchestrator;
pub use persistence::{FileStorage, MemoryStorage, PersistenceStore, Storage, StorageError};
pub use reconnect::ReconnectPolicy;
pub use router::MessageRouter;
pub use transport::Transport;
