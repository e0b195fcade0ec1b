use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Lifecycle status of the single batch generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
    Error,
}

impl TaskStatus {
    /// Human-readable label for status bars and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopping => "Stopping",
            Self::Completed => "Completed",
            Self::Error => "Error",
        }
    }

    /// A task is active while the runner may still be working on it.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Stopping)
    }

    /// Statuses that survive a restore (as "resumable pending reconnection").
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Correlation identifiers assigned by the job runner.
///
/// Both arrive incrementally. Commands target [`correlation_id`](Self::correlation_id):
/// the queue id when known, otherwise the task id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
}

impl TaskIdentity {
    pub fn correlation_id(&self) -> Option<&str> {
        self.queue_id
            .as_deref()
            .or(self.task_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn is_known(&self) -> bool {
        self.correlation_id().is_some()
    }

    /// Record a task id reported by the runner. Empty ids are ignored.
    pub fn set_task_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !id.is_empty() {
            self.task_id = Some(id);
        }
    }

    /// Record a queue id reported by the runner. Empty ids are ignored.
    pub fn set_queue_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !id.is_empty() {
            self.queue_id = Some(id);
        }
    }

    /// Use the task id as queue id when the runner never sent one.
    pub fn backfill_queue_id(&mut self) {
        if self.queue_id.is_none() {
            self.queue_id = self.task_id.clone();
        }
    }

    pub fn clear(&mut self) {
        self.task_id = None;
        self.queue_id = None;
    }
}

/// Counters reported by the job runner. Never computed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
        let back: TaskStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(back, TaskStatus::Paused);
    }

    #[test]
    fn active_and_resumable_sets() {
        assert!(TaskStatus::Stopping.is_active());
        assert!(!TaskStatus::Stopping.is_resumable());
        assert!(TaskStatus::Paused.is_resumable());
        assert!(!TaskStatus::Completed.is_active());
        assert!(!TaskStatus::Idle.is_active());
    }

    #[test]
    fn queue_id_is_preferred() {
        let identity = TaskIdentity {
            task_id: Some("t-1".into()),
            queue_id: Some("q-1".into()),
        };
        assert_eq!(identity.correlation_id(), Some("q-1"));
    }

    #[test]
    fn task_id_is_fallback() {
        let mut identity = TaskIdentity::default();
        assert!(!identity.is_known());
        identity.set_task_id("t-9");
        assert_eq!(identity.correlation_id(), Some("t-9"));
    }

    #[test]
    fn empty_ids_are_ignored() {
        let mut identity = TaskIdentity::default();
        identity.set_task_id("");
        identity.set_queue_id("");
        assert_eq!(identity, TaskIdentity::default());
    }

    #[test]
    fn backfill_only_when_queue_missing() {
        let mut identity = TaskIdentity::default();
        identity.set_task_id("t-1");
        identity.backfill_queue_id();
        assert_eq!(identity.queue_id.as_deref(), Some("t-1"));

        identity.set_task_id("t-2");
        identity.backfill_queue_id();
        assert_eq!(identity.queue_id.as_deref(), Some("t-1"));
    }
}
