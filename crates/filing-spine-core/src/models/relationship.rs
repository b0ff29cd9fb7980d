use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::{entity_relationships, relationship_evidence};

/// Typed edges between canonical entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    SubsidiaryOf,
    SupplierTo,
    CustomerOf,
    CompetitorOf,
    PartnerOf,
    ExecutiveOf,
    AuditorOf,
    MentionedIn,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::SubsidiaryOf => "SUBSIDIARY_OF",
            RelationshipType::SupplierTo => "SUPPLIER_TO",
            RelationshipType::CustomerOf => "CUSTOMER_OF",
            RelationshipType::CompetitorOf => "COMPETITOR_OF",
            RelationshipType::PartnerOf => "PARTNER_OF",
            RelationshipType::ExecutiveOf => "EXECUTIVE_OF",
            RelationshipType::AuditorOf => "AUDITOR_OF",
            RelationshipType::MentionedIn => "MENTIONED_IN",
        }
    }

    pub fn parse(s: &str) -> Option<RelationshipType> {
        match s.to_uppercase().as_str() {
            "SUBSIDIARY_OF" => Some(RelationshipType::SubsidiaryOf),
            "SUPPLIER_TO" => Some(RelationshipType::SupplierTo),
            "CUSTOMER_OF" => Some(RelationshipType::CustomerOf),
            "COMPETITOR_OF" => Some(RelationshipType::CompetitorOf),
            "PARTNER_OF" => Some(RelationshipType::PartnerOf),
            "EXECUTIVE_OF" => Some(RelationshipType::ExecutiveOf),
            "AUDITOR_OF" => Some(RelationshipType::AuditorOf),
            "MENTIONED_IN" => Some(RelationshipType::MentionedIn),
            _ => None,
        }
    }

    /// Exhibit-derived edges follow annual cadence and close on omission;
    /// narrative edges only close through curation.
    pub fn closes_on_omission(&self) -> bool {
        matches!(self, RelationshipType::SubsidiaryOf)
    }
}

/// A pointer from a relationship back to its originating sentence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceRef {
    pub accession_number: String,
    pub section_key: String,
    pub char_start: i32,
    pub char_end: i32,
    pub sentence_text: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = entity_relationships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EntityRelationship {
    pub id: Uuid,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub confidence: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_significant: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = relationship_evidence)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RelationshipEvidence {
    pub id: Uuid,
    pub relationship_id: Uuid,
    pub accession_number: String,
    pub section_key: String,
    pub char_start: i32,
    pub char_end: i32,
    pub sentence_text: String,
    pub created_at: DateTime<Utc>,
}

impl EntityRelationship {
    /// Record an observation of a relationship. The first observation
    /// creates the edge; later ones append evidence and bump last_seen_at.
    /// A closed exhibit-derived edge that is observed again reopens.
    /// Evidence is mandatory: an edge without provenance is not admissible.
    pub async fn observe(
        pool: &DatabasePool,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        relationship_type: RelationshipType,
        valid_from: Option<NaiveDate>,
        confidence: f64,
        evidence: &EvidenceRef,
    ) -> AppResult<EntityRelationship> {
        use crate::schema::entity_relationships::dsl;

        let mut conn = pool.get().await?;
        let evidence = evidence.clone();

        conn.transaction::<EntityRelationship, AppError, _>(|conn| {
            async move {
                let existing: Option<EntityRelationship> = dsl::entity_relationships
                    .filter(dsl::source_entity_id.eq(source_entity_id))
                    .filter(dsl::target_entity_id.eq(target_entity_id))
                    .filter(dsl::relationship_type.eq(relationship_type.as_str()))
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                let now = Utc::now();
                let relationship = match existing {
                    Some(prior) => {
                        diesel::update(dsl::entity_relationships.filter(dsl::id.eq(prior.id)))
                            .set((
                                dsl::last_seen_at.eq(now),
                                dsl::valid_to.eq(None::<NaiveDate>),
                                dsl::confidence.eq(prior.confidence.max(confidence)),
                                dsl::updated_at.eq(now),
                            ))
                            .get_result::<EntityRelationship>(conn)
                            .await?
                    }
                    None => {
                        diesel::insert_into(dsl::entity_relationships)
                            .values((
                                dsl::source_entity_id.eq(source_entity_id),
                                dsl::target_entity_id.eq(target_entity_id),
                                dsl::relationship_type.eq(relationship_type.as_str()),
                                dsl::valid_from.eq(valid_from),
                                dsl::confidence.eq(confidence),
                                dsl::first_seen_at.eq(now),
                                dsl::last_seen_at.eq(now),
                            ))
                            .get_result::<EntityRelationship>(conn)
                            .await?
                    }
                };

                diesel::insert_into(relationship_evidence::dsl::relationship_evidence)
                    .values((
                        relationship_evidence::dsl::relationship_id.eq(relationship.id),
                        relationship_evidence::dsl::accession_number
                            .eq(&evidence.accession_number),
                        relationship_evidence::dsl::section_key.eq(&evidence.section_key),
                        relationship_evidence::dsl::char_start.eq(evidence.char_start),
                        relationship_evidence::dsl::char_end.eq(evidence.char_end),
                        relationship_evidence::dsl::sentence_text.eq(&evidence.sentence_text),
                    ))
                    .execute(conn)
                    .await?;

                Ok(relationship)
            }
            .scope_boxed()
        })
        .await
    }

    /// Close open exhibit-derived edges from a parent whose targets were not
    /// seen in the latest filing of the same form. Returns the closed edges.
    pub async fn close_missing_subsidiaries(
        pool: &DatabasePool,
        parent_entity_id: Uuid,
        seen_target_ids: &[Uuid],
        closing_date: NaiveDate,
    ) -> AppResult<Vec<EntityRelationship>> {
        use crate::schema::entity_relationships::dsl;

        let mut conn = pool.get().await?;
        let closed = diesel::update(
            dsl::entity_relationships
                .filter(dsl::source_entity_id.eq(parent_entity_id))
                .filter(dsl::relationship_type.eq(RelationshipType::SubsidiaryOf.as_str()))
                .filter(dsl::valid_to.is_null())
                .filter(dsl::target_entity_id.ne_all(seen_target_ids.to_vec())),
        )
        .set((
            dsl::valid_to.eq(closing_date),
            dsl::updated_at.eq(Utc::now()),
        ))
        .get_results::<EntityRelationship>(&mut conn)
        .await?;
        Ok(closed)
    }

    /// Outgoing edges of a type, optionally restricted to those valid at as_of
    pub async fn outgoing(
        pool: &DatabasePool,
        source_entity_id: Uuid,
        relationship_type: RelationshipType,
        as_of: Option<NaiveDate>,
    ) -> AppResult<Vec<EntityRelationship>> {
        use crate::schema::entity_relationships::dsl;

        let mut conn = pool.get().await?;
        let mut query = dsl::entity_relationships
            .filter(dsl::source_entity_id.eq(source_entity_id))
            .filter(dsl::relationship_type.eq(relationship_type.as_str()))
            .into_boxed();

        if let Some(as_of) = as_of {
            query = query
                .filter(dsl::valid_from.is_null().or(dsl::valid_from.le(as_of)))
                .filter(dsl::valid_to.is_null().or(dsl::valid_to.gt(as_of)));
        }

        let rows = query
            .order(dsl::last_seen_at.desc())
            .load::<EntityRelationship>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Incoming edges of a type (e.g. suppliers of an entity are sources of
    /// SUPPLIER_TO edges targeting it)
    pub async fn incoming(
        pool: &DatabasePool,
        target_entity_id: Uuid,
        relationship_type: RelationshipType,
        as_of: Option<NaiveDate>,
    ) -> AppResult<Vec<EntityRelationship>> {
        use crate::schema::entity_relationships::dsl;

        let mut conn = pool.get().await?;
        let mut query = dsl::entity_relationships
            .filter(dsl::target_entity_id.eq(target_entity_id))
            .filter(dsl::relationship_type.eq(relationship_type.as_str()))
            .into_boxed();

        if let Some(as_of) = as_of {
            query = query
                .filter(dsl::valid_from.is_null().or(dsl::valid_from.le(as_of)))
                .filter(dsl::valid_to.is_null().or(dsl::valid_to.gt(as_of)));
        }

        let rows = query
            .order(dsl::last_seen_at.desc())
            .load::<EntityRelationship>(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn evidence(
        pool: &DatabasePool,
        relationship_id: Uuid,
    ) -> AppResult<Vec<RelationshipEvidence>> {
        use crate::schema::relationship_evidence::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::relationship_evidence
            .filter(dsl::relationship_id.eq(relationship_id))
            .order(dsl::created_at.asc())
            .load::<RelationshipEvidence>(&mut conn)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::{Entity, EntityStatus, EntityType, NewEntity};
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    async fn make_entity(pool: &DatabasePool, name: &str, source_id: &str) -> Entity {
        Entity::create(
            pool,
            &NewEntity {
                entity_type: EntityType::CompanyPublic.as_str().to_string(),
                primary_name: name.to_string(),
                source_system: "sec".to_string(),
                source_id: source_id.to_string(),
                status: EntityStatus::Active.as_str().to_string(),
            },
        )
        .await
        .unwrap()
    }

    fn ex21_evidence(accession: &str) -> EvidenceRef {
        EvidenceRef {
            accession_number: accession.to_string(),
            section_key: "EX_21".to_string(),
            char_start: 120,
            char_end: 152,
            sentence_text: "Acme Widgets LLC (Delaware)".to_string(),
        }
    }

    #[test]
    fn test_only_exhibit_edges_close_on_omission() {
        // REQUIREMENT: Subsidiary lists close on omission; narrative edges do not
        assert!(RelationshipType::SubsidiaryOf.closes_on_omission());
        assert!(!RelationshipType::SupplierTo.closes_on_omission());
        assert!(!RelationshipType::CompetitorOf.closes_on_omission());
    }

    #[tokio::test]
    #[serial]
    async fn test_observe_appends_evidence_and_bumps_last_seen() {
        // REQUIREMENT: Subsequent sightings append evidence and bump last_seen_at
        // PURPOSE: One edge per (source, target, type) regardless of sighting count

        let container = TestContainer::new().await;
        let pool = container.pool();

        let parent = make_entity(pool, "Filer F Corp.", "0001000001").await;
        let sub = make_entity(pool, "Acme Widgets LLC", "inferred:acme").await;

        let filed = NaiveDate::from_ymd_opt(2023, 11, 1);
        let first = EntityRelationship::observe(
            pool,
            parent.id,
            sub.id,
            RelationshipType::SubsidiaryOf,
            filed,
            1.0,
            &ex21_evidence("000100000123000001"),
        )
        .await
        .unwrap();
        assert!(first.valid_to.is_none());

        let second = EntityRelationship::observe(
            pool,
            parent.id,
            sub.id,
            RelationshipType::SubsidiaryOf,
            filed,
            1.0,
            &ex21_evidence("000100000124000001"),
        )
        .await
        .unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.last_seen_at >= first.last_seen_at);

        let evidence = EntityRelationship::evidence(pool, first.id).await.unwrap();
        assert_eq!(evidence.len(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_exhibit21_closure_on_omission() {
        // REQUIREMENT: A subsidiary listed in year N and omitted in year N+1
        // has its edge closed with valid_to = the later filed date
        // PURPOSE: Verify the closure scenario end-to-end at the store level

        let container = TestContainer::new().await;
        let pool = container.pool();

        let parent = make_entity(pool, "Filer F Corp.", "0001000001").await;
        let kept = make_entity(pool, "Kept Sub Inc.", "inferred:kept").await;
        let dropped = make_entity(pool, "Acme Widgets LLC", "inferred:acme").await;

        for sub in [&kept, &dropped] {
            EntityRelationship::observe(
                pool,
                parent.id,
                sub.id,
                RelationshipType::SubsidiaryOf,
                NaiveDate::from_ymd_opt(2023, 11, 1),
                1.0,
                &ex21_evidence("000100000123000001"),
            )
            .await
            .unwrap();
        }

        // 2024 filing lists only the kept subsidiary
        let closing = NaiveDate::from_ymd_opt(2024, 11, 1).unwrap();
        let closed = EntityRelationship::close_missing_subsidiaries(
            pool,
            parent.id,
            &[kept.id],
            closing,
        )
        .await
        .unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].target_entity_id, dropped.id);
        assert_eq!(closed[0].valid_to, Some(closing));

        // Point-in-time queries: before closure both edges are live
        let before = EntityRelationship::outgoing(
            pool,
            parent.id,
            RelationshipType::SubsidiaryOf,
            NaiveDate::from_ymd_opt(2024, 1, 1),
        )
        .await
        .unwrap();
        assert_eq!(before.len(), 2);

        let after = EntityRelationship::outgoing(
            pool,
            parent.id,
            RelationshipType::SubsidiaryOf,
            NaiveDate::from_ymd_opt(2024, 12, 1),
        )
        .await
        .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].target_entity_id, kept.id);
    }
}
