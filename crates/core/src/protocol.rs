//! Channel and message type names used on the batch generation socket.
//!
//! Inbound frames are classified by a `(channel, type)` pair; outbound
//! commands carry only a `type`. These must match the job runner's
//! names exactly.

/// Path of the job runner socket, relative to the hosting origin.
pub const ENDPOINT_PATH: &str = "/v1/generation/batchCopy";

// ---- channels ----

pub const CHANNEL_ENTITIES: &str = "entities";
pub const CHANNEL_ARTICLES: &str = "articles";
pub const CHANNEL_TASK: &str = "task";
pub const CHANNEL_SYSTEM: &str = "system";
pub const CHANNEL_ERROR: &str = "error";
pub const CHANNEL_LOG: &str = "log";
pub const CHANNEL_INFO: &str = "info";

// ---- inbound message types ----

pub const MSG_ENTITIES_EXTRACTED: &str = "entities_extracted";
pub const MSG_NEW_ENTITIES_EXTRACTED: &str = "new_entities_extracted";

pub const MSG_STATUS: &str = "status";
pub const MSG_ARTICLE_GENERATED: &str = "article_generated";
pub const MSG_ARTICLES_BATCH: &str = "articles_batch";
pub const MSG_BATCH_COMPLETED: &str = "batch_completed";

pub const MSG_TASK_STARTED: &str = "task_started";
pub const MSG_BATCH_COPY_STARTED: &str = "batch_copy_started";
pub const MSG_TASK_ERROR: &str = "task_error";
pub const MSG_BATCH_COPY_ERROR: &str = "batch_copy_error";
pub const MSG_TASK_PROGRESS: &str = "task_progress";

/// Channel-less response to `start_batch_copy` sent by older runners.
pub const MSG_BATCH_COPY_RESPONSE: &str = "batch_copy_response";
pub const MSG_PING: &str = "ping";
pub const MSG_PONG: &str = "pong";

// ---- outbound command types ----

pub const CMD_START_BATCH_COPY: &str = "start_batch_copy";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_RESUME: &str = "resume";
pub const CMD_STOP: &str = "stop";
pub const CMD_CONNECTION_TEST: &str = "connection_test";

// ---- `articles/status` message substrings ----

pub const STATUS_STARTED: &str = "started";
pub const STATUS_PAUSED: &str = "paused";
pub const STATUS_RESUMED: &str = "resumed";
pub const STATUS_STOPPED: &str = "stopped";
pub const STATUS_COMPLETED: &str = "completed";
