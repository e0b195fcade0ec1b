//! Persisted representation of the current task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::launch::BatchCopyParams;
use crate::results::{ExtractedEntity, GeneratedArticle};
use crate::types::{TaskIdentity, TaskStats, TaskStatus};

/// Snapshots older than this are discarded instead of restored.
pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything needed to rebuild the task after a restart.
///
/// `timestamp` is the save time in Unix milliseconds and drives the
/// staleness check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub identity: TaskIdentity,
    #[serde(default)]
    pub status: TaskStatus,
    /// Percentage in `0..=100`.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub stats: TaskStats,
    /// Parameters of the run that produced this state.
    #[serde(default)]
    pub config: Option<BatchCopyParams>,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub articles: Vec<GeneratedArticle>,
    /// Content of the most recently generated article.
    #[serde(default)]
    pub current_content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl TaskSnapshot {
    /// Milliseconds elapsed between the save time and `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// True when the snapshot is older than `max_age` at `now_ms`.
    pub fn is_stale(&self, now_ms: i64, max_age: Duration) -> bool {
        self.age_ms(now_ms) > max_age.as_millis() as i64
    }

    /// Drop identity, counters, and results, keeping nothing of the run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Zero the progress counters and empty the result collections.
    pub fn reset_results(&mut self) {
        self.progress = 0;
        self.stats = TaskStats::default();
        self.entities.clear();
        self.articles.clear();
        self.current_content.clear();
    }
}
