//! `batchgen` -- headless batch generation client.
//!
//! Restores any persisted task, connects to the job runner and, when a
//! URL or entity name is configured, launches a batch generation task.
//! Ctrl-C requests a stop and waits for the acknowledgment (or the
//! watchdog) before exiting.
//!
//! # Environment variables
//!
//! Connection settings are read by [`ClientConfig::from_env`]. The task
//! to launch:
//!
//! | Variable                | Required | Default | Description                      |
//! |-------------------------|----------|---------|----------------------------------|
//! | `BATCHGEN_URL`          | no       | --      | Source page URL                  |
//! | `BATCHGEN_ENTITY`       | no       | --      | Entity name to expand            |
//! | `BATCHGEN_MAX_ENTITIES` | no       | `20`    | Entity extraction limit          |
//! | `BATCHGEN_TEMPLATE_ID`  | no       | --      | Article template                 |

use std::sync::Arc;
use std::time::Duration;

use batchgen_client::{ClientConfig, FileStorage, StopOutcome, TaskOrchestrator, TracingNotifier};
use batchgen_core::launch::DEFAULT_MAX_ENTITIES;
use batchgen_core::LaunchRequest;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the first connection before launching.
const LAUNCH_CONNECT_WAIT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batchgen=info,batchgen_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        url = %config.endpoint.url(),
        state_dir = %config.state_dir.display(),
        max_reconnects = config.reconnect.max_attempts,
        "Starting batchgen",
    );

    let storage = Arc::new(FileStorage::new(config.state_dir.clone()));
    let orchestrator = TaskOrchestrator::new(&config, storage, Arc::new(TracingNotifier));

    let _frames = orchestrator.subscribe(|frame| {
        tracing::debug!(%frame, "Runner frame");
    });

    orchestrator.connect();

    if let Some(request) = launch_request_from_env() {
        if !orchestrator.wait_for_connection(LAUNCH_CONNECT_WAIT).await {
            tracing::error!("Job runner not reachable, task not launched");
        } else if let Err(e) = orchestrator.start(&request) {
            tracing::error!(error = %e, "Task launch rejected");
        }
    } else {
        tracing::info!(
            status = orchestrator.status_label(),
            "No BATCHGEN_URL or BATCHGEN_ENTITY set, monitoring only",
        );
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }

    if orchestrator.has_active_task() {
        if let StopOutcome::AwaitingAck { .. } = orchestrator.stop_task() {
            let mut wait = config.stop_ack_timeout + Duration::from_millis(100);
            let step = Duration::from_millis(50);
            while orchestrator.has_active_task() && !wait.is_zero() {
                tokio::time::sleep(step).await;
                wait = wait.saturating_sub(step);
            }
        }
    }

    orchestrator.shutdown().await;
}

fn launch_request_from_env() -> Option<LaunchRequest> {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    let url = var("BATCHGEN_URL");
    let entity = var("BATCHGEN_ENTITY");
    if url.is_none() && entity.is_none() {
        return None;
    }

    let max_entities = var("BATCHGEN_MAX_ENTITIES")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_MAX_ENTITIES);

    let mut request = LaunchRequest {
        url: url.unwrap_or_default(),
        entity_name: entity.unwrap_or_default(),
        ..Default::default()
    }
    .with_max_entities(max_entities);

    if let Some(template_id) = var("BATCHGEN_TEMPLATE_ID") {
        request = request.with_template(template_id);
    }
    Some(request)
}
