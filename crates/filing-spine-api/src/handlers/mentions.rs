use serde_json::json;
use uuid::Uuid;

use filing_spine_core::models::{EntityMention, Filing, Record};
use filing_spine_core::AppError;

use crate::server::AppState;

/// GET /mentions/{mention_id}/evidence: the mention, its source location
/// and every sighting of the records that produced the parent filing.
pub async fn get_mention_evidence(
    mention_id: Uuid,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mention = EntityMention::find_by_id(&state.pool, mention_id)
        .await
        .map_err(warp::reject::custom)?
        .ok_or_else(|| {
            warp::reject::custom(AppError::not_found(format!("mention {}", mention_id)))
        })?;

    let filing = Filing::find_by_accession(&state.pool, &mention.accession_number)
        .await
        .map_err(warp::reject::custom)?;

    let mut sightings = Vec::new();
    if let Some(filing) = &filing {
        for record_id in filing.source_record_ids.iter().flatten() {
            sightings.extend(
                Record::sightings(&state.pool, *record_id)
                    .await
                    .map_err(warp::reject::custom)?,
            );
        }
    }

    Ok(warp::reply::json(&json!({
        "data": {
            "mention": {
                "mention_id": mention.id,
                "entity_text": mention.entity_text,
                "extraction": {
                    "method": mention.extraction_method,
                    "model_id": mention.model_id,
                    "confidence": mention.confidence,
                    "extracted_at": mention.extracted_at,
                },
                "resolution": mention.resolved_entity_id.map(|id| json!({
                    "resolved_entity_id": id,
                    "resolution_method": mention.resolution_method,
                    "resolution_confidence": mention.resolution_confidence,
                })),
                "temporal": {
                    "first_seen_at": mention.first_seen_at,
                    "first_seen_filing": mention.first_seen_filing,
                    "last_seen_at": mention.last_seen_at,
                    "last_seen_filing": mention.last_seen_filing,
                    "occurrence_count": mention.occurrence_count,
                    "is_new": mention.is_new,
                    "is_removed": mention.is_removed,
                    "was_modified": mention.was_modified,
                    "prior_text": mention.prior_text,
                },
            },
            "source_location": {
                "accession_number": mention.accession_number,
                "section_key": mention.section_key,
                "char_start": mention.char_start,
                "char_end": mention.char_end,
                "paragraph_index": mention.paragraph_index,
                "sentence_index": mention.sentence_index,
                "sentence_text": mention.sentence_text,
                "surrounding_context": mention.surrounding_context,
            },
            "sightings": sightings,
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
