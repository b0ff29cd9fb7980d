//! Silver -> mentions: run the extractor cascade over a section (or a
//! paragraph window of one) and persist candidate mentions with
//! byte-precise provenance.

use std::sync::Arc;
use tracing::info;

use filing_spine_core::models::{
    queues, EntityMention, Filing, FilingSection, NewEntityMention, NewQueueTask, QueueTask,
    SectionKey,
};
use filing_spine_core::{AppError, AppResult};
use filing_spine_extract::mentions::locate_span;
use filing_spine_extract::{
    reconcile, DictionaryExtractor, LlmExtractor, MentionSource, PatternExtractor, SectionText,
};

use super::PipelineDeps;

pub async fn handle(deps: &Arc<PipelineDeps>, task: &QueueTask) -> AppResult<()> {
    let payload = &task.payload;
    let accession = payload
        .get("accession_number")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("mention task without accession".to_string()))?
        .to_string();
    let section_key = payload
        .get("section_key")
        .and_then(|v| v.as_str())
        .and_then(SectionKey::parse)
        .ok_or_else(|| AppError::Validation("mention task without section_key".to_string()))?;

    let section = FilingSection::find(&deps.pool, &accession, section_key)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!("section {} of {}", section_key, accession))
        })?;

    let window_start = payload
        .get("window_start")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let window_end = payload
        .get("window_end")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(section.text.len())
        .min(section.text.len());
    let window_text = &section.text[window_start..window_end];

    let view = SectionText {
        section_key: &section.section_key,
        text: window_text,
        base_offset: section.char_start as usize + window_start,
    };

    // Cascade: dictionary over the hot cache, then patterns, then the LLM
    // for designated sections when enabled
    let names = deps.name_cache.names().await;
    let dictionary = DictionaryExtractor::new(names.as_ref().clone());

    let mut candidates = dictionary.extract(&view);
    candidates.extend(PatternExtractor.extract(&view));

    if let Some(llm) = &deps.llm {
        if LlmExtractor::wants_section(&section.section_key) {
            candidates.extend(llm.extract(&view).await?);
        }
    }

    let reconciled = reconcile(candidates);
    let mention_count = reconciled.len();

    for candidate in reconciled {
        // Local offset within the section text
        let local = candidate.char_start - section.char_start as usize;
        let location = locate_span(&section.text, local);
        let sentence = section.text[location.sentence_start..location.sentence_end].to_string();

        // Surrounding context: the sentence plus a margin either side
        let ctx_start = location.sentence_start.saturating_sub(120);
        let ctx_end = (location.sentence_end + 120).min(section.text.len());
        let context = section
            .text
            .get(ctx_start..ctx_end)
            .map(|s| s.to_string());

        let new_mention = NewEntityMention {
            entity_text: candidate.text.clone(),
            accession_number: accession.clone(),
            section_key: section.section_key.clone(),
            char_start: candidate.char_start as i32,
            char_end: candidate.char_end as i32,
            paragraph_index: location.paragraph_index,
            sentence_index: location.sentence_index,
            sentence_text: sentence,
            surrounding_context: context,
            extraction_method: candidate.method.as_str().to_string(),
            model_id: deps
                .llm
                .as_ref()
                .filter(|_| candidate.method == filing_spine_core::models::ExtractionMethod::Llm)
                .map(|l| l.model_id().to_string()),
            confidence: candidate.confidence,
        };

        EntityMention::record(&deps.pool, &new_mention).await?;
    }

    if let Some(filing) = Filing::find_by_accession(&deps.pool, &accession).await? {
        Filing::mark_mentions_extracted(&deps.pool, filing.id).await?;
    }

    // Resolution for an accession is admissible in any order; one live
    // resolve task per accession covers every section
    QueueTask::enqueue(
        &deps.pool,
        &NewQueueTask {
            queue: queues::MENTIONS_RESOLVE.to_string(),
            task_key: accession.clone(),
            payload: serde_json::json!({ "accession_number": accession }),
            priority: 5,
            max_retries: deps.config.worker.max_attempts,
            scheduled_for: None,
        },
    )
    .await?;

    info!(%accession, section = %section.section_key, mentions = mention_count, "section extracted");
    Ok(())
}
