//! Inbound message routing.
//!
//! [`MessageRouter`] turns raw runner frames into [`TaskController`]
//! transitions. Frames are handled strictly in arrival order:
//!
//! 1. parse (malformed frames are logged and dropped),
//! 2. fan out to registered observers,
//! 3. dispatch by `(channel, type)`.

use batchgen_core::protocol::{
    MSG_NEW_ENTITIES_EXTRACTED, STATUS_COMPLETED, STATUS_PAUSED, STATUS_RESUMED, STATUS_STARTED,
    STATUS_STOPPED,
};

use crate::controller::TaskController;
use crate::messages::{
    self, classify, decode_data, ArticlesData, EntitiesData, InboundMessage, ProgressData, Route,
};
use crate::observers::{ObserverRegistry, Subscription};

const TASK_ID_KEYS: &[&str] = &["task_id", "taskId"];
const QUEUE_ID_KEYS: &[&str] = &["queue_id", "queueId"];

#[derive(Clone, Default)]
pub struct MessageRouter {
    observers: ObserverRegistry,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route with an externally owned observer set.
    pub fn with_observers(observers: ObserverRegistry) -> Self {
        Self { observers }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    /// Register an observer of every well-formed inbound frame.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.observers.register(observer)
    }

    /// Parse a raw frame. Malformed frames are logged and yield `None`.
    pub fn parse(&self, text: &str) -> Option<(serde_json::Value, InboundMessage)> {
        match messages::parse_frame(text) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "Dropping malformed frame");
                None
            }
        }
    }

    pub fn notify_observers(&self, raw: &serde_json::Value) {
        self.observers.notify(raw);
    }

    /// Parse, notify, and dispatch one frame.
    ///
    /// Returns the route taken, or `None` for a malformed frame.
    pub fn handle_frame(&self, text: &str, controller: &mut TaskController) -> Option<Route> {
        let (raw, msg) = self.parse(text)?;
        self.notify_observers(&raw);
        Some(self.dispatch(&msg, controller))
    }

    /// Apply the state transition for an already parsed message.
    pub fn dispatch(&self, msg: &InboundMessage, controller: &mut TaskController) -> Route {
        let route = classify(msg);
        tracing::trace!(channel = ?msg.channel(), kind = %msg.kind, ?route, "Dispatching message");

        match route {
            Route::EntitiesExtracted => on_entities(msg, controller),
            Route::ArticleStatus => on_article_status(msg, controller),
            Route::ArticleGenerated => match messages::decode_generated_article(msg) {
                Ok(Some(article)) => controller.record_article(article),
                Ok(None) => tracing::debug!("article_generated without data"),
                Err(e) => malformed(msg, &e),
            },
            Route::ArticleBatch => match decode_data::<ArticlesData>(msg) {
                Ok(Some(ArticlesData {
                    articles: Some(articles),
                })) => controller.record_articles(articles),
                Ok(_) => tracing::debug!(kind = %msg.kind, "Article batch without articles"),
                Err(e) => malformed(msg, &e),
            },
            Route::TaskStarted => {
                controller.mark_started(msg.data_id(TASK_ID_KEYS), msg.data_id(QUEUE_ID_KEYS));
            }
            Route::TaskError => {
                controller.report_error(msg.text().unwrap_or("Task execution failed"));
                if msg.data_flag("fatal") {
                    controller.abandon_task();
                }
            }
            Route::TaskProgress => match decode_data::<ProgressData>(msg) {
                Ok(Some(data)) => controller.apply_progress(data.progress, data.stats),
                Ok(None) => tracing::debug!("task_progress without data"),
                Err(e) => malformed(msg, &e),
            },
            Route::Error => {
                controller.report_error(msg.text().unwrap_or("Operation failed"));
                if msg.is_fatal() {
                    controller.abandon_task();
                }
            }
            Route::Silent | Route::Keepalive => {}
            Route::LegacyStartResponse => {
                if msg.success.unwrap_or(true) {
                    controller.mark_started(msg.legacy_task_id(), None);
                } else {
                    controller.report_error(msg.text().unwrap_or("Batch generation failed to start"));
                    controller.abandon_task();
                }
            }
            Route::Unrecognized => {
                tracing::debug!(channel = ?msg.channel(), kind = %msg.kind, "Dropping unrecognized message");
            }
        }
        route
    }
}

fn on_entities(msg: &InboundMessage, controller: &mut TaskController) {
    match decode_data::<EntitiesData>(msg) {
        Ok(Some(EntitiesData {
            entities: Some(raw),
            is_new_round,
        })) => {
            let received = raw.len();
            let entities = EntitiesData::decode_entities(raw);
            if received > 0 && entities.is_empty() {
                tracing::warn!(kind = %msg.kind, received, "No usable entities in message");
                return;
            }
            controller.record_entities(
                entities,
                is_new_round,
                msg.kind == MSG_NEW_ENTITIES_EXTRACTED,
            );
        }
        Ok(_) => tracing::debug!(kind = %msg.kind, "Entity message without entities"),
        Err(e) => malformed(msg, &e),
    }
}

/// `articles/status` is keyed on the message text. The first matching
/// substring wins.
fn on_article_status(msg: &InboundMessage, controller: &mut TaskController) {
    let Some(text) = msg.text() else {
        tracing::debug!("Status message without text");
        return;
    };

    if text.contains(STATUS_STARTED) {
        controller.mark_started(None, msg.data_id(QUEUE_ID_KEYS));
    } else if text.contains(STATUS_PAUSED) {
        controller.acknowledge_paused();
    } else if text.contains(STATUS_RESUMED) {
        controller.acknowledge_resumed();
    } else if text.contains(STATUS_STOPPED) {
        controller.acknowledge_stopped();
    } else if text.contains(STATUS_COMPLETED) {
        controller.mark_completed();
    } else {
        tracing::debug!(text, "Unhandled status text");
    }
}

fn malformed(msg: &InboundMessage, error: &serde_json::Error) {
    tracing::warn!(
        channel = ?msg.channel(),
        kind = %msg.kind,
        error = %error,
        "Dropping message with malformed data",
    );
}
