use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::entity_mentions;

/// How a mention span was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtractionMethod {
    Dictionary,
    Pattern,
    Ner,
    Llm,
    Heuristic,
    Manual,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Dictionary => "DICTIONARY",
            ExtractionMethod::Pattern => "PATTERN",
            ExtractionMethod::Ner => "NER",
            ExtractionMethod::Llm => "LLM",
            ExtractionMethod::Heuristic => "HEURISTIC",
            ExtractionMethod::Manual => "MANUAL",
        }
    }

    /// Tie-break priority when overlapping spans carry equal confidence;
    /// lower ordinal wins (Dictionary > Pattern > NER > LLM > Heuristic).
    pub fn priority(&self) -> u8 {
        match self {
            ExtractionMethod::Dictionary => 0,
            ExtractionMethod::Pattern => 1,
            ExtractionMethod::Ner => 2,
            ExtractionMethod::Llm => 3,
            ExtractionMethod::Heuristic => 4,
            ExtractionMethod::Manual => 5,
        }
    }
}

/// How a mention was resolved to a canonical entity, if at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionMethod {
    Exact,
    Fuzzy,
    Alias,
    Manual,
    Ambiguous,
    Unresolved,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::Exact => "EXACT",
            ResolutionMethod::Fuzzy => "FUZZY",
            ResolutionMethod::Alias => "ALIAS",
            ResolutionMethod::Manual => "MANUAL",
            ResolutionMethod::Ambiguous => "AMBIGUOUS",
            ResolutionMethod::Unresolved => "UNRESOLVED",
        }
    }
}

/// Gold-layer atomic fact: one entity span with byte-precise provenance
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = entity_mentions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EntityMention {
    pub id: Uuid,
    pub entity_text: String,
    pub accession_number: String,
    pub section_key: String,
    pub char_start: i32,
    pub char_end: i32,
    pub paragraph_index: i32,
    pub sentence_index: i32,
    pub sentence_text: String,
    pub surrounding_context: Option<String>,
    pub extraction_method: String,
    pub model_id: Option<String>,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
    pub resolved_entity_id: Option<Uuid>,
    pub resolution_method: Option<String>,
    pub resolution_confidence: Option<f64>,
    pub first_seen_at: DateTime<Utc>,
    pub first_seen_filing: String,
    pub last_seen_at: DateTime<Utc>,
    pub last_seen_filing: String,
    pub occurrence_count: i32,
    pub is_new: bool,
    pub is_removed: bool,
    pub was_modified: bool,
    pub prior_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate, Deserialize)]
pub struct NewEntityMention {
    #[validate(length(min = 1, max = 500))]
    pub entity_text: String,
    pub accession_number: String,
    pub section_key: String,
    pub char_start: i32,
    pub char_end: i32,
    pub paragraph_index: i32,
    pub sentence_index: i32,
    pub sentence_text: String,
    pub surrounding_context: Option<String>,
    pub extraction_method: String,
    pub model_id: Option<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

impl NewEntityMention {
    /// The span bounded by the offsets must match entity_text byte-for-byte;
    /// the extractor checks content against the document, the store checks
    /// the lengths agree.
    pub fn check_span(&self) -> AppResult<()> {
        if self.char_start >= self.char_end {
            return Err(AppError::IntegrityViolation(format!(
                "mention span [{}, {}) is empty or inverted",
                self.char_start, self.char_end
            )));
        }
        let span_len = (self.char_end - self.char_start) as usize;
        if self.entity_text.len() != span_len {
            return Err(AppError::IntegrityViolation(format!(
                "mention text length {} does not match span [{}, {})",
                self.entity_text.len(),
                self.char_start,
                self.char_end
            )));
        }
        Ok(())
    }
}

impl EntityMention {
    /// Record an extractor output. Identity is the exact span location; a
    /// re-sighting of the same span updates the temporal block instead of
    /// inserting a second row, so consumers can dedup by mention id.
    pub async fn record(pool: &DatabasePool, new_mention: &NewEntityMention) -> AppResult<EntityMention> {
        use crate::schema::entity_mentions::dsl;

        new_mention.validate()?;
        new_mention.check_span()?;

        let mut conn = pool.get().await?;
        let new_mention = new_mention.clone();

        conn.transaction::<EntityMention, AppError, _>(|conn| {
            async move {
                let existing: Option<EntityMention> = dsl::entity_mentions
                    .filter(dsl::accession_number.eq(&new_mention.accession_number))
                    .filter(dsl::section_key.eq(&new_mention.section_key))
                    .filter(dsl::char_start.eq(new_mention.char_start))
                    .filter(dsl::char_end.eq(new_mention.char_end))
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                let now = Utc::now();
                match existing {
                    Some(prior) => {
                        let text_changed = prior.entity_text != new_mention.entity_text;
                        let mention = diesel::update(
                            dsl::entity_mentions.filter(dsl::id.eq(prior.id)),
                        )
                        .set((
                            dsl::entity_text.eq(&new_mention.entity_text),
                            dsl::last_seen_at.eq(now),
                            dsl::last_seen_filing.eq(&new_mention.accession_number),
                            dsl::occurrence_count.eq(prior.occurrence_count + 1),
                            dsl::is_new.eq(false),
                            dsl::was_modified.eq(prior.was_modified || text_changed),
                            dsl::prior_text.eq(if text_changed {
                                Some(prior.entity_text.clone())
                            } else {
                                prior.prior_text.clone()
                            }),
                            dsl::updated_at.eq(now),
                        ))
                        .get_result(conn)
                        .await?;
                        Ok(mention)
                    }
                    None => {
                        let mention = diesel::insert_into(dsl::entity_mentions)
                            .values((
                                dsl::entity_text.eq(&new_mention.entity_text),
                                dsl::accession_number.eq(&new_mention.accession_number),
                                dsl::section_key.eq(&new_mention.section_key),
                                dsl::char_start.eq(new_mention.char_start),
                                dsl::char_end.eq(new_mention.char_end),
                                dsl::paragraph_index.eq(new_mention.paragraph_index),
                                dsl::sentence_index.eq(new_mention.sentence_index),
                                dsl::sentence_text.eq(&new_mention.sentence_text),
                                dsl::surrounding_context.eq(&new_mention.surrounding_context),
                                dsl::extraction_method.eq(&new_mention.extraction_method),
                                dsl::model_id.eq(&new_mention.model_id),
                                dsl::confidence.eq(new_mention.confidence),
                                dsl::extracted_at.eq(now),
                                dsl::first_seen_at.eq(now),
                                dsl::first_seen_filing.eq(&new_mention.accession_number),
                                dsl::last_seen_at.eq(now),
                                dsl::last_seen_filing.eq(&new_mention.accession_number),
                            ))
                            .get_result(conn)
                            .await?;
                        Ok(mention)
                    }
                }
            }
            .scope_boxed()
        })
        .await
    }

    /// Attach a resolution outcome. Failures are recorded too: unresolved
    /// and ambiguous mentions stay queryable for curation and backfill.
    pub async fn set_resolution(
        pool: &DatabasePool,
        mention_id: Uuid,
        resolved_entity_id: Option<Uuid>,
        method: ResolutionMethod,
        confidence: Option<f64>,
    ) -> AppResult<EntityMention> {
        use crate::schema::entity_mentions::dsl;

        let mut conn = pool.get().await?;
        let mention = diesel::update(dsl::entity_mentions.filter(dsl::id.eq(mention_id)))
            .set((
                dsl::resolved_entity_id.eq(resolved_entity_id),
                dsl::resolution_method.eq(method.as_str()),
                dsl::resolution_confidence.eq(confidence),
                dsl::updated_at.eq(Utc::now()),
            ))
            .get_result(&mut conn)
            .await?;
        Ok(mention)
    }

    pub async fn find_by_id(pool: &DatabasePool, mention_id: Uuid) -> AppResult<Option<EntityMention>> {
        use crate::schema::entity_mentions::dsl;

        let mut conn = pool.get().await?;
        let mention = dsl::entity_mentions
            .filter(dsl::id.eq(mention_id))
            .first::<EntityMention>(&mut conn)
            .await
            .optional()?;
        Ok(mention)
    }

    pub async fn for_section(
        pool: &DatabasePool,
        accession: &str,
        section_key: &str,
    ) -> AppResult<Vec<EntityMention>> {
        use crate::schema::entity_mentions::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::entity_mentions
            .filter(dsl::accession_number.eq(accession))
            .filter(dsl::section_key.eq(section_key))
            .order(dsl::char_start.asc())
            .load::<EntityMention>(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn for_accession(pool: &DatabasePool, accession: &str) -> AppResult<Vec<EntityMention>> {
        use crate::schema::entity_mentions::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::entity_mentions
            .filter(dsl::accession_number.eq(accession))
            .order((dsl::section_key.asc(), dsl::char_start.asc()))
            .load::<EntityMention>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Mentions awaiting a resolution verdict for an accession
    pub async fn unresolved_for_accession(
        pool: &DatabasePool,
        accession: &str,
    ) -> AppResult<Vec<EntityMention>> {
        use crate::schema::entity_mentions::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::entity_mentions
            .filter(dsl::accession_number.eq(accession))
            .filter(dsl::resolution_method.is_null())
            .order(dsl::char_start.asc())
            .load::<EntityMention>(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    fn tsmc_mention() -> NewEntityMention {
        let sentence =
            "We rely on TSMC for substantially all of our advanced logic wafer supply.";
        NewEntityMention {
            entity_text: "TSMC".to_string(),
            accession_number: "000032019324000081".to_string(),
            section_key: "ITEM_1A".to_string(),
            char_start: 45034,
            char_end: 45038,
            paragraph_index: 12,
            sentence_index: 3,
            sentence_text: sentence.to_string(),
            surrounding_context: Some(sentence.to_string()),
            extraction_method: ExtractionMethod::Dictionary.as_str().to_string(),
            model_id: None,
            confidence: 0.98,
        }
    }

    #[test]
    fn test_span_length_must_match_text() {
        // REQUIREMENT: document[char_start..char_end] == entity_text byte-for-byte
        // PURPOSE: Length mismatches are integrity violations, refused at the store

        let good = tsmc_mention();
        assert!(good.check_span().is_ok());

        let mut bad = tsmc_mention();
        bad.char_end = 45040;
        assert!(matches!(
            bad.check_span(),
            Err(AppError::IntegrityViolation(_))
        ));

        let mut inverted = tsmc_mention();
        inverted.char_end = inverted.char_start;
        assert!(inverted.check_span().is_err());
    }

    #[test]
    fn test_method_priority_ordering() {
        // Dictionary > Pattern > NER > LLM > Heuristic
        assert!(ExtractionMethod::Dictionary.priority() < ExtractionMethod::Pattern.priority());
        assert!(ExtractionMethod::Pattern.priority() < ExtractionMethod::Ner.priority());
        assert!(ExtractionMethod::Ner.priority() < ExtractionMethod::Llm.priority());
        assert!(ExtractionMethod::Llm.priority() < ExtractionMethod::Heuristic.priority());
    }

    #[tokio::test]
    #[serial]
    async fn test_record_and_resight_updates_temporal_block() {
        // REQUIREMENT: Temporal fields are updated on re-sighting, never a
        // second row for the same span
        // PURPOSE: Downstream consumers dedup by mention id

        let container = TestContainer::new().await;
        let pool = container.pool();

        let first = EntityMention::record(pool, &tsmc_mention()).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.occurrence_count, 1);

        let again = EntityMention::record(pool, &tsmc_mention()).await.unwrap();
        assert_eq!(again.id, first.id);
        assert!(!again.is_new);
        assert_eq!(again.occurrence_count, 2);
        assert!(!again.was_modified);

        // Text change at the same location is tracked with prior_text
        let mut changed = tsmc_mention();
        changed.entity_text = "TSM".to_string();
        changed.char_end = changed.char_start + 3;
        // Different span -> separate mention
        let other = EntityMention::record(pool, &changed).await.unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    #[serial]
    async fn test_resolution_failures_are_persisted() {
        // REQUIREMENT: Resolver errors are never fatal; unresolved mentions persist
        // PURPOSE: Later backfill can revisit unresolved mentions

        let container = TestContainer::new().await;
        let pool = container.pool();

        let mention = EntityMention::record(pool, &tsmc_mention()).await.unwrap();
        let updated = EntityMention::set_resolution(
            pool,
            mention.id,
            None,
            ResolutionMethod::Unresolved,
            None,
        )
        .await
        .unwrap();

        assert_eq!(updated.resolution_method.as_deref(), Some("UNRESOLVED"));
        assert!(updated.resolved_entity_id.is_none());
    }
}
