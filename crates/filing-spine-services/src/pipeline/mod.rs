//! Pipeline workers: one consumer loop per queue, each claiming tasks with
//! SKIP LOCKED, running the stage handler under the task deadline and
//! classifying failures into retry or quarantine.

pub mod graph;
pub mod mentions;
pub mod parse;
pub mod resolve;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use filing_spine_core::models::{queues, QueueTask, ValidationEvent};
use filing_spine_core::{AppError, AppResult, Config, DatabasePool};
use filing_spine_entity::{EntitySpine, NameCache};
use filing_spine_extract::{LlmExtractor, SectionParser};
use filing_spine_ingest::{DocumentStore, FilingFetcher};

/// Shared dependencies handed to every stage handler
pub struct PipelineDeps {
    pub pool: DatabasePool,
    pub config: Config,
    pub fetcher: FilingFetcher,
    pub store: DocumentStore,
    pub name_cache: Arc<NameCache>,
    pub spine: EntitySpine,
    pub llm: Option<LlmExtractor>,
}

impl PipelineDeps {
    pub fn new(
        pool: DatabasePool,
        config: Config,
        fetcher: FilingFetcher,
        store: DocumentStore,
    ) -> Self {
        let llm = LlmExtractor::from_config(&config.llm);
        Self {
            spine: EntitySpine::new(pool.clone()),
            name_cache: Arc::new(NameCache::new()),
            pool,
            config,
            fetcher,
            store,
            llm,
        }
    }

    pub fn section_parser(&self) -> SectionParser {
        SectionParser::new(
            self.config.parser.version.clone(),
            self.config.parser.max_section_bytes,
        )
    }
}

async fn dispatch(deps: &Arc<PipelineDeps>, task: &QueueTask) -> AppResult<()> {
    match task.queue.as_str() {
        queues::FILINGS_PARSE => parse::handle(deps, task).await,
        queues::SECTIONS_MENTIONS => mentions::handle(deps, task).await,
        queues::MENTIONS_RESOLVE => resolve::handle(deps, task).await,
        queues::RESOLVED_GRAPH => graph::handle(deps, task).await,
        other => Err(AppError::InternalError(format!(
            "no handler for queue {}",
            other
        ))),
    }
}

/// Consume one queue until shutdown. Every task runs under the configured
/// deadline; deadline expiry returns the task for retry while attempts
/// remain. Terminal errors quarantine the task without crashing the
/// worker.
pub async fn run_worker(
    deps: Arc<PipelineDeps>,
    queue: &'static str,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_secs(deps.config.worker.poll_interval_seconds.max(1));
    let deadline = Duration::from_secs(deps.config.worker.deadline_seconds.max(1));
    info!(queue, worker_id, "pipeline worker started");

    loop {
        if *shutdown.borrow() {
            info!(queue, worker_id, "pipeline worker stopping");
            return;
        }

        let task = match crate::queue::claim_next(&deps.pool, queue, &worker_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                error!(queue, error = %e, "failed to claim task");
                sleep(poll_interval).await;
                continue;
            }
        };

        let outcome = timeout(deadline, dispatch(&deps, &task)).await;

        let result = match outcome {
            // Deadline expired: in-flight work is abandoned, durable state
            // is what the handler already committed. Retry if attempts
            // remain.
            Err(_) => {
                warn!(queue, task_key = %task.task_key, "task deadline exceeded");
                crate::queue::retry_or_dead_letter(
                    &deps.pool,
                    task.id,
                    "deadline exceeded",
                    deps.config.worker.backoff_base_seconds,
                )
                .await
                .map(|_| ())
            }
            Ok(Ok(())) => crate::queue::complete(&deps.pool, task.id).await,
            Ok(Err(e)) if e.is_transient() => {
                warn!(queue, task_key = %task.task_key, error = %e, "transient failure, retrying");
                crate::queue::retry_or_dead_letter(
                    &deps.pool,
                    task.id,
                    &e.to_string(),
                    deps.config.worker.backoff_base_seconds,
                )
                .await
                .map(|_| ())
            }
            // Terminal: poison the task, surface a validation event and
            // keep the pipeline moving
            Ok(Err(e)) => quarantine(&deps.pool, &task, &e).await,
        };

        if let Err(e) = result {
            error!(queue, task_key = %task.task_key, error = %e, "task bookkeeping failed");
        }
    }
}

async fn quarantine(pool: &DatabasePool, task: &QueueTask, error: &AppError) -> AppResult<()> {
    let accession = task
        .payload
        .get("accession_number")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    ValidationEvent::record(
        pool,
        &task.queue,
        accession.as_deref(),
        serde_json::json!({
            "reason": error.to_string(),
            "task_key": task.task_key,
            "payload": task.payload,
        }),
    )
    .await?;

    QueueTask::dead_letter(pool, task, &error.to_string()).await?;
    let update = filing_spine_core::models::UpdateQueueTask {
        status: Some(filing_spine_core::models::TaskStatus::Failed.to_string()),
        error_message: Some(error.to_string()),
        locked_by: Some(None),
        locked_at: Some(None),
        updated_at: chrono::Utc::now(),
        ..Default::default()
    };
    QueueTask::update(pool, task.id, &update).await?;
    Ok(())
}
