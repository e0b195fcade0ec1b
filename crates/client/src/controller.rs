//! Task lifecycle state machine.
//!
//! [`TaskController`] owns the [`TaskSnapshot`] of the one task this
//! client drives and exposes the commands that move it through
//! `idle -> running -> paused/stopping -> completed/error`. Commands
//! talk to the runner through a [`Transport`]; server acknowledgments
//! arrive through the router-facing methods. Every mutation is
//! persisted before the method returns.
//!
//! The controller is not synchronized. The orchestrator keeps it behind
//! one mutex and mutates it from a single dispatch task.

use std::sync::Arc;

use batchgen_core::results::EntityPayload;
use batchgen_core::{
    BatchCopyParams, CoreError, ExtractedEntity, GeneratedArticle, LaunchRequest, TaskIdentity,
    TaskSnapshot, TaskStats, TaskStatus,
};

use crate::events::ConnectionEvent;
use crate::messages::OutboundCommand;
use crate::notify::Notifier;
use crate::persistence::PersistenceStore;
use crate::transport::Transport;

/// A command was rejected. No state was changed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid launch request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("Not connected to the job runner")]
    NotConnected,

    #[error("Neither a queue id nor a task id is known for the current task")]
    MissingIdentity,

    #[error("A task is already {0}")]
    TaskActive(TaskStatus),

    #[error("Failed to send {0} command")]
    SendFailed(&'static str),
}

/// Result of [`TaskController::stop_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No identity was known; local state was cleaned up immediately.
    Cleaned,
    /// A stop command went out. Arm a watchdog that calls
    /// [`TaskController::handle_stop_timeout`] with `generation`.
    AwaitingAck { generation: u64 },
}

/// Why a forced cleanup ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The runner confirmed the stop.
    Acknowledged,
    /// Stop was requested with no identity to address.
    NoIdentity,
    /// The stop acknowledgment did not arrive in time.
    Timeout,
}

pub struct TaskController {
    snapshot: TaskSnapshot,
    /// Restored running/paused task waiting for the socket to come back.
    resumable: bool,
    /// Incremented on every stop request; stale watchdogs compare against it.
    stop_generation: u64,
    transport: Arc<dyn Transport>,
    store: PersistenceStore,
    notifier: Arc<dyn Notifier>,
}

impl TaskController {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: PersistenceStore,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            snapshot: TaskSnapshot::default(),
            resumable: false,
            stop_generation: 0,
            transport,
            store,
            notifier,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn status(&self) -> TaskStatus {
        self.snapshot.status
    }

    pub fn status_label(&self) -> &'static str {
        self.snapshot.status.label()
    }

    pub fn has_active_task(&self) -> bool {
        self.snapshot.status.is_active()
    }

    /// True while a restored running/paused task awaits reconnection.
    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.snapshot.identity
    }

    pub fn progress(&self) -> u8 {
        self.snapshot.progress
    }

    pub fn stats(&self) -> TaskStats {
        self.snapshot.stats
    }

    pub fn config(&self) -> Option<&BatchCopyParams> {
        self.snapshot.config.as_ref()
    }

    pub fn entities(&self) -> &[ExtractedEntity] {
        &self.snapshot.entities
    }

    pub fn articles(&self) -> &[GeneratedArticle] {
        &self.snapshot.articles
    }

    pub fn current_content(&self) -> &str {
        &self.snapshot.current_content
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Seed state from the persisted snapshot. Returns whether one was
    /// applied.
    ///
    /// Running and paused tasks keep their status and become resumable;
    /// every other status restores as idle.
    pub fn restore(&mut self) -> bool {
        let Some(mut snapshot) = self.store.restore() else {
            return false;
        };

        if snapshot.status.is_resumable() {
            self.resumable = true;
            self.notifier
                .notify_info("Unfinished task found; it can continue once reconnected");
        } else {
            snapshot.status = TaskStatus::Idle;
            self.resumable = false;
        }

        tracing::info!(
            status = %snapshot.status,
            task_id = ?snapshot.identity.task_id,
            queue_id = ?snapshot.identity.queue_id,
            resumable = self.resumable,
            "Task state restored",
        );
        self.snapshot = snapshot;
        true
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Launch a batch generation task.
    pub fn start(&mut self, request: &LaunchRequest) -> Result<(), CommandError> {
        let params = match request.to_params() {
            Ok(params) => params,
            Err(e) => {
                self.notifier.notify_warning("Enter a URL or an entity name first");
                return Err(e.into());
            }
        };

        if !self.transport.is_connected() {
            self.notifier.notify_error("Not connected to the job runner");
            return Err(CommandError::NotConnected);
        }

        if self.has_active_task() {
            let status = self.snapshot.status;
            self.notifier
                .notify_warning(&format!("A task is already {status}; stop it first"));
            return Err(CommandError::TaskActive(status));
        }

        let command = OutboundCommand::StartBatchCopy {
            data: params.clone(),
        };
        if !self.transport.send(&command) {
            return Err(CommandError::SendFailed(command.kind()));
        }

        let description = match (params.url.as_deref(), params.entity_name.as_deref()) {
            (Some(url), Some(entity)) => format!(" from URL {url} and entity {entity}"),
            (Some(url), None) => format!(" from URL {url}"),
            (None, Some(entity)) => format!(" from entity {entity}"),
            (None, None) => String::new(),
        };

        self.snapshot.reset_results();
        self.snapshot.identity.clear();
        self.snapshot.config = Some(params);
        self.resumable = false;
        self.set_status(TaskStatus::Running);
        self.persist();

        self.notifier
            .notify_info(&format!("Batch generation requested{description}"));
        Ok(())
    }

    pub fn pause_task(&mut self) -> Result<(), CommandError> {
        let queue_id = self.command_target("pause")?;
        self.send_control(OutboundCommand::Pause {
            queue_id: queue_id.clone(),
        })?;
        self.persist();
        self.notifier
            .notify_info(&format!("Pause requested (id: {queue_id})"));
        Ok(())
    }

    pub fn resume_task(&mut self) -> Result<(), CommandError> {
        let queue_id = self.command_target("resume")?;
        self.send_control(OutboundCommand::Resume {
            queue_id: queue_id.clone(),
        })?;
        self.persist();
        self.notifier
            .notify_info(&format!("Resume requested (id: {queue_id})"));
        Ok(())
    }

    /// Request a stop.
    ///
    /// Without an identity the local state is cleaned up directly, which
    /// makes repeated calls safe.
    pub fn stop_task(&mut self) -> StopOutcome {
        let Some(queue_id) = self.snapshot.identity.correlation_id().map(str::to_string) else {
            self.cleanup_after_stop(StopReason::NoIdentity);
            return StopOutcome::Cleaned;
        };

        self.stop_generation += 1;
        self.set_status(TaskStatus::Stopping);
        self.notifier.notify_info("Stopping task...");

        let command = OutboundCommand::Stop { queue_id };
        if !self.transport.send(&command) {
            tracing::warn!("Stop command not sent, waiting for the watchdog");
        }
        self.persist();

        StopOutcome::AwaitingAck {
            generation: self.stop_generation,
        }
    }

    /// Watchdog expiry for the stop request tagged `generation`.
    ///
    /// Cleans up only if that request is still unacknowledged. Returns
    /// whether cleanup ran.
    pub fn handle_stop_timeout(&mut self, generation: u64) -> bool {
        if self.snapshot.status != TaskStatus::Stopping || generation != self.stop_generation {
            tracing::debug!(generation, current = self.stop_generation, "Stop watchdog outdated");
            return false;
        }
        tracing::warn!(generation, "Stop acknowledgment timed out");
        self.cleanup_after_stop(StopReason::Timeout);
        true
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    pub fn on_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.notifier.notify_success("Connected to the job runner");
                if self.resumable {
                    self.resumable = false;
                    let id = self.snapshot.identity.correlation_id().unwrap_or("unknown");
                    self.notifier
                        .notify_info(&format!("Restored task {id} can continue"));
                }
            }
            ConnectionEvent::Disconnected {
                retry_in: Some(delay),
                ..
            } => {
                self.notifier.notify_warning(&format!(
                    "Connection lost, reconnecting in {}s",
                    delay.as_secs_f32()
                ));
            }
            ConnectionEvent::Disconnected { retry_in: None, .. } => {
                self.notifier.notify_info("Disconnected from the job runner");
            }
            ConnectionEvent::Error { message } => {
                self.notifier
                    .notify_warning(&format!("Connection error: {message}"));
            }
            ConnectionEvent::MaxReconnectAttemptsReached { attempts } => {
                self.notifier.notify_error(&format!(
                    "Could not reach the job runner after {attempts} attempts; check the network and reconnect"
                ));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Router-facing transitions
    // -----------------------------------------------------------------------

    /// Append extracted entities, tagged with the round flag.
    pub fn record_entities(&mut self, entities: Vec<EntityPayload>, new_round: bool, incremental: bool) {
        let count = entities.len();
        let received_at = chrono::Utc::now();
        self.snapshot.entities.extend(
            entities
                .into_iter()
                .map(|payload| ExtractedEntity::from_payload(payload, new_round, received_at)),
        );
        self.persist();

        tracing::info!(count, new_round, total = self.snapshot.entities.len(), "Entities extracted");
        let verb = if incremental { "Extracted another" } else { "Extracted" };
        let round = if new_round { " (new round)" } else { "" };
        self.notifier
            .notify_success(&format!("{verb} {count} entities{round}"));
    }

    /// Append one generated article.
    pub fn record_article(&mut self, article: GeneratedArticle) {
        let message = format!("Article generated: {}", article.display_title());
        self.append_articles(std::iter::once(article));
        self.persist();
        self.notifier.notify_success(&message);
    }

    /// Append a batch of generated articles.
    pub fn record_articles(&mut self, articles: Vec<GeneratedArticle>) {
        let count = articles.len();
        self.append_articles(articles);
        self.persist();
        self.notifier
            .notify_success(&format!("Generated {count} articles"));
    }

    fn append_articles(&mut self, articles: impl IntoIterator<Item = GeneratedArticle>) {
        for article in articles {
            if let Some(content) = article.content.as_deref().filter(|c| !c.is_empty()) {
                self.snapshot.current_content = content.to_string();
            }
            tracing::debug!(title = article.display_title(), "Article received");
            self.snapshot.articles.push(article);
        }
    }

    /// The runner reported the task as started, with whatever ids it
    /// knows. A missing queue id falls back to the task id.
    pub fn mark_started(&mut self, task_id: Option<String>, queue_id: Option<String>) {
        if let Some(task_id) = task_id {
            self.snapshot.identity.set_task_id(task_id);
        }
        if let Some(queue_id) = queue_id {
            self.snapshot.identity.set_queue_id(queue_id);
        }
        self.snapshot.identity.backfill_queue_id();

        self.resumable = false;
        self.set_status(TaskStatus::Running);
        self.persist();

        tracing::info!(
            task_id = ?self.snapshot.identity.task_id,
            queue_id = ?self.snapshot.identity.queue_id,
            "Task started",
        );
        self.notifier.notify_success("Batch generation task started");
    }

    /// Pause acknowledgment. Ignored unless the task is running or paused.
    pub fn acknowledge_paused(&mut self) {
        if !self.snapshot.status.is_resumable() {
            tracing::debug!(status = %self.snapshot.status, "Ignoring pause ack");
            return;
        }
        self.set_status(TaskStatus::Paused);
        self.persist();
        self.notifier.notify_info("Task paused");
    }

    /// Resume acknowledgment. Ignored unless the task is running or paused.
    pub fn acknowledge_resumed(&mut self) {
        if !self.snapshot.status.is_resumable() {
            tracing::debug!(status = %self.snapshot.status, "Ignoring resume ack");
            return;
        }
        self.set_status(TaskStatus::Running);
        self.persist();
        self.notifier.notify_info("Task resumed");
    }

    pub fn acknowledge_stopped(&mut self) {
        tracing::info!(status = %self.snapshot.status, "Stop acknowledged by runner");
        self.cleanup_after_stop(StopReason::Acknowledged);
    }

    /// Completion. Only an active task can complete.
    pub fn mark_completed(&mut self) {
        if !self.has_active_task() {
            tracing::info!(status = %self.snapshot.status, "Ignoring completion without an active task");
            return;
        }
        self.set_status(TaskStatus::Completed);
        self.persist();
        self.notifier.notify_success("Batch generation task completed");
    }

    /// Take server-reported progress and counters.
    pub fn apply_progress(&mut self, progress: Option<f64>, stats: Option<TaskStats>) {
        if let Some(progress) = progress.filter(|p| p.is_finite()) {
            self.snapshot.progress = progress.round().clamp(0.0, 100.0) as u8;
        }
        if let Some(stats) = stats {
            self.snapshot.stats = stats;
        }
        tracing::debug!(progress = self.snapshot.progress, stats = ?self.snapshot.stats, "Task progress");
        self.persist();
    }

    pub fn report_error(&self, message: &str) {
        tracing::warn!(message, "Runner reported an error");
        self.notifier.notify_error(message);
    }

    /// Fatal error: back to idle, identity dropped, results kept.
    pub fn abandon_task(&mut self) {
        tracing::warn!(
            status = %self.snapshot.status,
            task_id = ?self.snapshot.identity.task_id,
            "Abandoning task after fatal error",
        );
        self.snapshot.identity.clear();
        self.resumable = false;
        self.set_status(TaskStatus::Idle);
        self.persist();
    }

    /// Full reset: idle, counters zeroed, identity and results cleared,
    /// stored snapshot purged.
    pub fn cleanup_after_stop(&mut self, reason: StopReason) {
        self.snapshot.reset();
        self.resumable = false;
        self.store.clear();

        tracing::info!(?reason, "Task state cleaned up");
        match reason {
            StopReason::Acknowledged => self
                .notifier
                .notify_success("Task stopped and local state cleared"),
            StopReason::NoIdentity => self
                .notifier
                .notify_warning("No queue or task id known; local state cleared"),
            StopReason::Timeout => self
                .notifier
                .notify_warning("Stop request timed out; local state force-cleared"),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn set_status(&mut self, status: TaskStatus) {
        let previous = self.snapshot.status;
        if previous != status {
            tracing::info!(from = %previous, to = %status, "Task status changed");
        }
        self.snapshot.status = status;
    }

    fn persist(&mut self) {
        self.store.save(&mut self.snapshot);
    }

    /// Preferred correlation id for a control command.
    fn command_target(&self, action: &str) -> Result<String, CommandError> {
        match self.snapshot.identity.correlation_id() {
            Some(id) => Ok(id.to_string()),
            None => {
                self.notifier.notify_error(&format!(
                    "Neither a queue id nor a task id is known; cannot {action}"
                ));
                Err(CommandError::MissingIdentity)
            }
        }
    }

    fn send_control(&self, command: OutboundCommand) -> Result<(), CommandError> {
        if !self.transport.is_connected() {
            self.notifier.notify_error("Not connected to the job runner");
            return Err(CommandError::NotConnected);
        }
        if !self.transport.send(&command) {
            return Err(CommandError::SendFailed(command.kind()));
        }
        Ok(())
    }
}
