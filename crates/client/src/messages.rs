//! Runner socket message types and parser.
//!
//! Inbound frames have the shape
//! `{"channel"?, "type", "message"?, "data"?, "success"?, "fatal"?}` and
//! are classified by their `(channel, type)` pair into a [`Route`].
//! Outbound commands are the [`OutboundCommand`] enum, tagged by `type`.

use batchgen_core::protocol::*;
use batchgen_core::results::{is_truthy, truthy_flag, EntityPayload};
use batchgen_core::{BatchCopyParams, GeneratedArticle, TaskStats};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A frame pushed by the job runner.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub fatal: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    /// Legacy channel-less responses carry the task id at top level.
    #[serde(default)]
    pub task_id: Option<serde_json::Value>,
    #[serde(default, rename = "taskId")]
    pub task_id_camel: Option<serde_json::Value>,
}

impl InboundMessage {
    /// The channel, treating an empty string as absent.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref().filter(|c| !c.is_empty())
    }

    /// First non-empty id found under `data` for any of `keys`.
    pub fn data_id(&self, keys: &[&str]) -> Option<String> {
        let data = self.data.as_ref()?;
        keys.iter().find_map(|key| data.get(*key).and_then(id_value))
    }

    /// Truthiness of `data.<key>`.
    pub fn data_flag(&self, key: &str) -> bool {
        self.data
            .as_ref()
            .and_then(|data| data.get(key))
            .is_some_and(is_truthy)
    }

    /// Fatal marker at top level or inside `data`.
    pub fn is_fatal(&self) -> bool {
        self.fatal.unwrap_or(false) || self.data_flag("fatal")
    }

    /// Task id sent at top level by legacy responses.
    pub fn legacy_task_id(&self) -> Option<String> {
        self.task_id_camel
            .as_ref()
            .and_then(id_value)
            .or_else(|| self.task_id.as_ref().and_then(id_value))
    }

    /// Human-readable message text, if any.
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

/// Accept ids sent as strings or numbers; empty strings are absent.
fn id_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a raw text frame.
///
/// Returns the untouched JSON (for observers) together with the typed
/// message. Malformed JSON or a missing `type` is an error; callers
/// should log it and drop the frame.
pub fn parse_frame(text: &str) -> Result<(serde_json::Value, InboundMessage), serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let message = InboundMessage::deserialize(&raw)?;
    Ok((raw, message))
}

/// State transition an inbound message maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `entities/entities_extracted` or `entities/new_entities_extracted`.
    EntitiesExtracted,
    /// `articles/status`; the message text selects the transition.
    ArticleStatus,
    /// `articles/article_generated`.
    ArticleGenerated,
    /// `articles/articles_batch` or `articles/batch_completed`.
    ArticleBatch,
    /// `task|system/task_started` or `batch_copy_started`.
    TaskStarted,
    /// `task|system/task_error` or `batch_copy_error`.
    TaskError,
    /// `task|system/task_progress`.
    TaskProgress,
    /// Anything on the `error` channel.
    Error,
    /// `log` and `info` traffic; no state effect.
    Silent,
    /// Channel-less `connection_test`, `ping`, `pong`.
    Keepalive,
    /// Channel-less `start_batch_copy` or `batch_copy_response`.
    LegacyStartResponse,
    /// Not understood by this client; dropped.
    Unrecognized,
}

/// Map a message to its route by `(channel, type)`, or by `type` alone
/// for the legacy channel-less set.
pub fn classify(msg: &InboundMessage) -> Route {
    let kind = msg.kind.as_str();
    match msg.channel() {
        Some(CHANNEL_ENTITIES) => match kind {
            MSG_ENTITIES_EXTRACTED | MSG_NEW_ENTITIES_EXTRACTED => Route::EntitiesExtracted,
            _ => Route::Unrecognized,
        },
        Some(CHANNEL_ARTICLES) => match kind {
            MSG_STATUS => Route::ArticleStatus,
            MSG_ARTICLE_GENERATED => Route::ArticleGenerated,
            MSG_ARTICLES_BATCH | MSG_BATCH_COMPLETED => Route::ArticleBatch,
            _ => Route::Unrecognized,
        },
        Some(CHANNEL_TASK | CHANNEL_SYSTEM) => match kind {
            MSG_TASK_STARTED | MSG_BATCH_COPY_STARTED => Route::TaskStarted,
            MSG_TASK_ERROR | MSG_BATCH_COPY_ERROR => Route::TaskError,
            MSG_TASK_PROGRESS => Route::TaskProgress,
            _ => Route::Unrecognized,
        },
        Some(CHANNEL_ERROR) => Route::Error,
        Some(CHANNEL_LOG | CHANNEL_INFO) => Route::Silent,
        Some(_) => Route::Unrecognized,
        None => match kind {
            CMD_CONNECTION_TEST | MSG_PING | MSG_PONG => Route::Keepalive,
            CMD_START_BATCH_COPY | MSG_BATCH_COPY_RESPONSE => Route::LegacyStartResponse,
            _ => Route::Unrecognized,
        },
    }
}

// ---- payloads ----

/// `data` of entity extraction messages. Entities stay raw so one bad
/// entry cannot sink the rest of the batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitiesData {
    #[serde(default)]
    pub entities: Option<Vec<serde_json::Value>>,
    #[serde(default, deserialize_with = "truthy_flag")]
    pub is_new_round: bool,
}

impl EntitiesData {
    /// Decode each entity on its own, logging and skipping the ones that
    /// do not fit.
    pub fn decode_entities(entities: Vec<serde_json::Value>) -> Vec<EntityPayload> {
        entities
            .into_iter()
            .filter_map(|raw| match serde_json::from_value(raw) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed entity");
                    None
                }
            })
            .collect()
    }
}

/// `data` of batch article messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticlesData {
    #[serde(default)]
    pub articles: Option<Vec<GeneratedArticle>>,
}

/// `data` of `task_progress` messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressData {
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub stats: Option<TaskStats>,
}

/// Decode `data` into a payload type. Absent `data` decodes as `None`.
pub fn decode_data<T>(msg: &InboundMessage) -> Result<Option<T>, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match &msg.data {
        Some(data) if !data.is_null() => T::deserialize(data).map(Some),
        _ => Ok(None),
    }
}

/// The article of an `article_generated` message: `data.article` when
/// present, otherwise `data` itself.
pub fn decode_generated_article(
    msg: &InboundMessage,
) -> Result<Option<GeneratedArticle>, serde_json::Error> {
    let Some(data) = msg.data.as_ref().filter(|d| !d.is_null()) else {
        return Ok(None);
    };
    let article = data.get("article").filter(|a| a.is_object()).unwrap_or(data);
    GeneratedArticle::deserialize(article).map(Some)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Commands sent to the job runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    StartBatchCopy { data: BatchCopyParams },
    Pause { queue_id: String },
    Resume { queue_id: String },
    Stop { queue_id: String },
    ConnectionTest { timestamp: i64, client_info: ClientInfo },
}

impl OutboundCommand {
    /// The wire `type` of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartBatchCopy { .. } => CMD_START_BATCH_COPY,
            Self::Pause { .. } => CMD_PAUSE,
            Self::Resume { .. } => CMD_RESUME,
            Self::Stop { .. } => CMD_STOP,
            Self::ConnectionTest { .. } => CMD_CONNECTION_TEST,
        }
    }
}

/// Client description attached to `connection_test`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientInfo {
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    pub url: String,
    pub client_id: String,
}
