//! Mentions -> resolved: run the resolution ladder over every unresolved
//! mention of an accession, as of the filing date.

use std::sync::Arc;
use tracing::info;

use filing_spine_core::models::{
    queues, EntityMention, Filing, NewQueueTask, QueueTask, ResolutionMethod,
};
use filing_spine_core::{AppError, AppResult};
use filing_spine_entity::{ResolutionContext, ResolutionWarning, Resolver, SpineSnapshot};

use super::PipelineDeps;

pub async fn handle(deps: &Arc<PipelineDeps>, task: &QueueTask) -> AppResult<()> {
    let accession = task
        .payload
        .get("accession_number")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("resolve task without accession".to_string()))?
        .to_string();

    let filing = Filing::find_by_accession(&deps.pool, &accession)
        .await?
        .ok_or_else(|| AppError::not_found(format!("filing {}", accession)))?;

    let mentions = EntityMention::unresolved_for_accession(&deps.pool, &accession).await?;
    if mentions.is_empty() {
        return enqueue_graph(deps, &accession).await;
    }

    // One snapshot for the whole batch keeps resolution deterministic
    let snapshot = Arc::new(SpineSnapshot::load(&deps.pool).await?);
    let resolver = Resolver::new(snapshot, deps.config.resolver.clone());

    let ctx = ResolutionContext {
        filer_entity_id: filing.entity_id,
        sentence: None,
    };

    let mut resolved = 0;
    for mention in &mentions {
        // Resolver errors are never fatal: every outcome, including
        // unresolved and ambiguous, is persisted on the mention.
        let resolution = resolver.resolve(&mention.entity_text, &ctx, filing.filed_date);

        let method = if resolution.entity_id.is_some() {
            resolved += 1;
            resolution.method
        } else if resolution.warnings.contains(&ResolutionWarning::Ambiguous) {
            ResolutionMethod::Ambiguous
        } else {
            ResolutionMethod::Unresolved
        };

        EntityMention::set_resolution(
            &deps.pool,
            mention.id,
            resolution.entity_id,
            method,
            if resolution.entity_id.is_some() {
                Some(resolution.confidence)
            } else {
                None
            },
        )
        .await?;
    }

    info!(
        %accession,
        mentions = mentions.len(),
        resolved,
        "mention batch resolved"
    );

    enqueue_graph(deps, &accession).await
}

async fn enqueue_graph(deps: &Arc<PipelineDeps>, accession: &str) -> AppResult<()> {
    QueueTask::enqueue(
        &deps.pool,
        &NewQueueTask {
            queue: queues::RESOLVED_GRAPH.to_string(),
            task_key: accession.to_string(),
            payload: serde_json::json!({ "accession_number": accession }),
            priority: 5,
            max_retries: deps.config.worker.max_attempts,
            scheduled_for: None,
        },
    )
    .await?;
    Ok(())
}
