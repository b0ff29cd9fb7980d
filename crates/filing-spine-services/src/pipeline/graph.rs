//! Resolved -> graph: turn resolved mentions and exhibit rows into typed,
//! evidence-backed relationships and 8-K events.

use std::sync::Arc;
use tracing::info;

use filing_spine_core::models::{
    EntityMention, EntityRelationship, EvidenceRef, Filing, FilingEvent, FilingSection,
    NewFilingEvent, QueueTask, RelationshipType, SectionKey,
};
use filing_spine_core::{AppError, AppResult};
use filing_spine_entity::{ResolutionContext, Resolver, SpineSnapshot};
use filing_spine_extract::{
    build, canonicalize, extract_8k_events, parse_ex21, FilingContext, ResolvedMention,
};

use super::PipelineDeps;

pub async fn handle(deps: &Arc<PipelineDeps>, task: &QueueTask) -> AppResult<()> {
    let accession = task
        .payload
        .get("accession_number")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Validation("graph task without accession".to_string()))?
        .to_string();

    let filing = Filing::find_by_accession(&deps.pool, &accession)
        .await?
        .ok_or_else(|| AppError::not_found(format!("filing {}", accession)))?;
    let Some(filer_id) = filing.entity_id else {
        // Without a resolved filer there is nothing to anchor edges to
        return Ok(());
    };

    let filing_ctx = FilingContext {
        accession_number: filing.accession_number.clone(),
        form_type: filing.form_type.clone(),
        filed_date: filing.filed_date,
        filer_entity_id: Some(filer_id),
    };

    // Narrative edges from resolved mentions
    let mentions = EntityMention::for_accession(&deps.pool, &accession).await?;
    let resolved: Vec<ResolvedMention> = mentions
        .iter()
        .filter(|m| m.section_key != SectionKey::Ex21.as_str())
        .map(|m| ResolvedMention {
            mention_id: m.id,
            entity_id: m.resolved_entity_id,
            entity_text: m.entity_text.clone(),
            section_key: m.section_key.clone(),
            char_start: m.char_start,
            char_end: m.char_end,
            sentence_text: m.sentence_text.clone(),
        })
        .collect();

    let plan = build(&filing_ctx, &resolved, None);
    let mut edges = 0;
    for planned in &plan.relationships {
        EntityRelationship::observe(
            &deps.pool,
            planned.source_entity_id,
            planned.target_entity_id,
            planned.relationship_type,
            planned.valid_from,
            planned.confidence,
            &planned.evidence,
        )
        .await?;
        edges += 1;
    }

    // Exhibit 21: resolve each subsidiary row, inferring entities for rows
    // with no plausible match, then close edges the new list omits
    if let Some(ex21) = FilingSection::find(&deps.pool, &accession, SectionKey::Ex21).await? {
        edges += process_ex21(deps, &filing, filer_id, &ex21).await?;
    }

    // 8-K item router
    let mut events = 0;
    if filing.form_type.starts_with("8-K") {
        events = process_8k(deps, &filing, filer_id).await?;
    }

    info!(%accession, edges, events, "graph updated");
    Ok(())
}

async fn process_ex21(
    deps: &Arc<PipelineDeps>,
    filing: &Filing,
    filer_id: uuid::Uuid,
    section: &FilingSection,
) -> AppResult<usize> {
    let rows = parse_ex21(&section.text);
    if rows.is_empty() {
        return Ok(0);
    }

    let snapshot = Arc::new(SpineSnapshot::load(&deps.pool).await?);
    let resolver = Resolver::new(snapshot, deps.config.resolver.clone());
    let ctx = ResolutionContext {
        filer_entity_id: Some(filer_id),
        sentence: None,
    };

    let mut seen = Vec::with_capacity(rows.len());
    let mut edges = 0;

    for row in &rows {
        let evidence = EvidenceRef {
            accession_number: filing.accession_number.clone(),
            section_key: SectionKey::Ex21.as_str().to_string(),
            char_start: section.char_start + row.char_start as i32,
            char_end: section.char_start + row.char_end as i32,
            sentence_text: section.text[row.char_start..row.char_end].to_string(),
        };

        let resolution = resolver.resolve(&row.name, &ctx, filing.filed_date);
        let subsidiary_id = match resolution.entity_id {
            Some(id) if id != filer_id => id,
            Some(_) => continue,
            None => {
                // No plausible match: mint an INFERRED entity linked to the
                // parent with this row as evidence
                deps.spine
                    .infer_subsidiary(
                        &row.name,
                        row.jurisdiction.as_deref(),
                        filer_id,
                        filing.filed_date,
                        &evidence,
                    )
                    .await?
                    .id
            }
        };

        EntityRelationship::observe(
            &deps.pool,
            filer_id,
            subsidiary_id,
            RelationshipType::SubsidiaryOf,
            Some(filing.filed_date),
            1.0,
            &evidence,
        )
        .await?;
        seen.push(subsidiary_id);
        edges += 1;
    }

    // Annual cadence closure: open subsidiary edges missing from this
    // year's list close with the new filed date
    let closed = EntityRelationship::close_missing_subsidiaries(
        &deps.pool,
        filer_id,
        &seen,
        filing.filed_date,
    )
    .await?;
    if !closed.is_empty() {
        info!(
            accession = %filing.accession_number,
            closed = closed.len(),
            "subsidiary edges closed by omission"
        );
    }

    Ok(edges)
}

async fn process_8k(
    deps: &Arc<PipelineDeps>,
    filing: &Filing,
    filer_id: uuid::Uuid,
) -> AppResult<usize> {
    // The 8-K body comes from the stored primary document
    let filename = filing
        .primary_document_url
        .as_deref()
        .and_then(|u| u.rsplit('/').next())
        .ok_or_else(|| {
            AppError::ParserError(format!(
                "filing {} has no primary document url",
                filing.accession_number
            ))
        })?;

    let raw = deps
        .store
        .read(&filing.filer_cik, &filing.accession_number, filename)
        .await?;
    let doc = canonicalize(&String::from_utf8_lossy(&raw));

    let events = extract_8k_events(doc.text());
    let count = events.len();
    for event in events {
        FilingEvent::create(
            &deps.pool,
            &NewFilingEvent {
                accession_number: filing.accession_number.clone(),
                event_type: event.event_type,
                item_code: event.item_code,
                description: event.description,
                entity_id: Some(filer_id),
                occurred_on: filing.filed_date,
            },
        )
        .await?;
    }
    Ok(count)
}
