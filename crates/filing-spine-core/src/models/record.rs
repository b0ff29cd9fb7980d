use chrono::{DateTime, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::{record_sightings, records};

/// Sightings from the same feed inside this window are collapsed into a
/// single observation.
pub const DEDUPE_WINDOW_SECONDS: i64 = 300;

/// Refinement layer of a record. Promotion is monotone: BRONZE -> SILVER -> GOLD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Bronze => write!(f, "BRONZE"),
            Layer::Silver => write!(f, "SILVER"),
            Layer::Gold => write!(f, "GOLD"),
        }
    }
}

impl From<String> for Layer {
    fn from(s: String) -> Self {
        match s.to_uppercase().as_str() {
            "SILVER" => Layer::Silver,
            "GOLD" => Layer::Gold,
            _ => Layer::Bronze,
        }
    }
}

/// One observation of a filing in one feed, deduplicated by natural key
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Record {
    pub id: Uuid,
    pub natural_key: String,
    pub content_hash: String,
    pub published_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    pub layer: String,
    pub processed: bool,
    pub was_modified: bool,
    pub raw_payload: serde_json::Value,
    pub cik: Option<String>,
    pub form_type: Option<String>,
    pub filing_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = records)]
struct NewRecord<'a> {
    natural_key: &'a str,
    content_hash: &'a str,
    published_at: Option<DateTime<Utc>>,
    captured_at: DateTime<Utc>,
    layer: String,
    raw_payload: &'a serde_json::Value,
    cik: Option<&'a str>,
    form_type: Option<&'a str>,
    filing_date: Option<NaiveDate>,
}

/// One row of the append-only sighting history
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = record_sightings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RecordSighting {
    pub id: Uuid,
    pub record_id: Uuid,
    pub feed_name: String,
    pub observed_at: DateTime<Utc>,
    pub source_url: String,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub prior_content: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = record_sightings)]
struct NewSighting<'a> {
    record_id: Uuid,
    feed_name: &'a str,
    observed_at: DateTime<Utc>,
    source_url: &'a str,
    source_updated_at: Option<DateTime<Utc>>,
    content_hash: &'a str,
    prior_content: Option<serde_json::Value>,
}

/// A candidate yielded by a feed adapter, before admission.
///
/// Adapters may legally yield the same natural key any number of times; the
/// store collapses duplicates. The natural key is feed-independent:
/// `sec:filing:<dashless accession>`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordCandidate {
    #[validate(length(min = 1, max = 255))]
    pub natural_key: String,
    #[validate(length(min = 1, max = 50))]
    pub feed_name: String,
    pub source_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
    pub cik: Option<String>,
    pub form_type: Option<String>,
    pub filing_date: Option<NaiveDate>,
    pub accession_number: Option<String>,
}

impl RecordCandidate {
    /// Stable hash over the normalized identity fields. serde_json orders
    /// map keys, so equal payloads hash equally regardless of source order.
    pub fn content_hash(&self) -> String {
        let normalized = serde_json::json!({
            "natural_key": self.natural_key,
            "cik": self.cik,
            "form_type": self.form_type,
            "filing_date": self.filing_date,
            "payload": self.raw_payload,
        });
        let mut hasher = Sha256::new();
        hasher.update(normalized.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Outcome of admitting a candidate into the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmitOutcome {
    /// First admission of this natural key
    New,
    /// Same feed re-observed the record inside the de-dupe window; no
    /// sighting was appended
    Duplicate,
    /// Known record, sighting appended (payload may have changed)
    Resighted,
}

#[derive(Debug, Clone)]
pub struct AdmitResult {
    pub outcome: AdmitOutcome,
    pub record: Record,
}

impl Record {
    /// Admit a candidate, serializing concurrent admits of the same natural
    /// key on the record row lock. The loser of an insert race observes the
    /// winner's row and is demoted to a resighting.
    pub async fn admit(pool: &DatabasePool, candidate: &RecordCandidate) -> AppResult<AdmitResult> {
        Self::admit_with_window(pool, candidate, DEDUPE_WINDOW_SECONDS).await
    }

    pub async fn admit_with_window(
        pool: &DatabasePool,
        candidate: &RecordCandidate,
        dedupe_window_seconds: i64,
    ) -> AppResult<AdmitResult> {
        use crate::schema::records::dsl;

        candidate.validate()?;

        let hash = candidate.content_hash();
        let now = Utc::now();
        // published_at is asserted by the source; clock skew past our own
        // capture time would break the published <= captured invariant.
        let published_at = match candidate.published_at {
            Some(p) if p > now => {
                tracing::warn!(
                    natural_key = %candidate.natural_key,
                    "source published_at is in the future, clamping to capture time"
                );
                Some(now)
            }
            other => other,
        };

        let mut conn = pool.get().await?;

        let candidate = candidate.clone();
        conn.transaction::<AdmitResult, AppError, _>(|conn| {
            async move {
                let new_record = NewRecord {
                    natural_key: &candidate.natural_key,
                    content_hash: &hash,
                    published_at,
                    captured_at: now,
                    layer: Layer::Bronze.to_string(),
                    raw_payload: &candidate.raw_payload,
                    cik: candidate.cik.as_deref(),
                    form_type: candidate.form_type.as_deref(),
                    filing_date: candidate.filing_date,
                };

                let inserted = diesel::insert_into(dsl::records)
                    .values(&new_record)
                    .on_conflict(dsl::natural_key)
                    .do_nothing()
                    .execute(conn)
                    .await?;

                // Row lock serializes concurrent admits of this natural key.
                let record: Record = dsl::records
                    .filter(dsl::natural_key.eq(&candidate.natural_key))
                    .for_update()
                    .first(conn)
                    .await?;

                if inserted == 1 {
                    append_sighting(conn, record.id, &candidate, now, &hash, None).await?;
                    return Ok(AdmitResult {
                        outcome: AdmitOutcome::New,
                        record,
                    });
                }

                if hash == record.content_hash {
                    let window_start = now - Duration::seconds(dedupe_window_seconds);
                    let recent_same_feed: i64 = record_sightings::dsl::record_sightings
                        .filter(record_sightings::dsl::record_id.eq(record.id))
                        .filter(record_sightings::dsl::feed_name.eq(&candidate.feed_name))
                        .filter(record_sightings::dsl::observed_at.gt(window_start))
                        .count()
                        .get_result(conn)
                        .await?;

                    if recent_same_feed > 0 {
                        return Ok(AdmitResult {
                            outcome: AdmitOutcome::Duplicate,
                            record,
                        });
                    }

                    append_sighting(conn, record.id, &candidate, now, &hash, None).await?;
                    return Ok(AdmitResult {
                        outcome: AdmitOutcome::Resighted,
                        record,
                    });
                }

                // Payload changed since the last admission: keep the prior
                // content in the sighting envelope and flip was_modified.
                let prior = record.raw_payload.clone();
                append_sighting(conn, record.id, &candidate, now, &hash, Some(&prior)).await?;

                let record: Record = diesel::update(dsl::records.filter(dsl::id.eq(record.id)))
                    .set((
                        dsl::content_hash.eq(&hash),
                        dsl::raw_payload.eq(&candidate.raw_payload),
                        dsl::was_modified.eq(true),
                        dsl::updated_at.eq(now),
                    ))
                    .get_result(conn)
                    .await?;

                Ok(AdmitResult {
                    outcome: AdmitOutcome::Resighted,
                    record,
                })
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn find_by_natural_key(
        pool: &DatabasePool,
        key: &str,
    ) -> AppResult<Option<Record>> {
        use crate::schema::records::dsl;

        let mut conn = pool.get().await?;
        let record = dsl::records
            .filter(dsl::natural_key.eq(key))
            .first::<Record>(&mut conn)
            .await
            .optional()?;
        Ok(record)
    }

    pub async fn find_by_id(pool: &DatabasePool, record_id: Uuid) -> AppResult<Option<Record>> {
        use crate::schema::records::dsl;

        let mut conn = pool.get().await?;
        let record = dsl::records
            .filter(dsl::id.eq(record_id))
            .first::<Record>(&mut conn)
            .await
            .optional()?;
        Ok(record)
    }

    /// Sighting history in admission order
    pub async fn sightings(pool: &DatabasePool, record_id: Uuid) -> AppResult<Vec<RecordSighting>> {
        use crate::schema::record_sightings::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::record_sightings
            .filter(dsl::record_id.eq(record_id))
            .order(dsl::observed_at.asc())
            .load::<RecordSighting>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Advance the refinement layer. Demotions are ignored: promotions are
    /// monotone per the record lifecycle.
    pub async fn promote(pool: &DatabasePool, record_id: Uuid, target: Layer) -> AppResult<Record> {
        use crate::schema::records::dsl;

        let mut conn = pool.get().await?;
        let record: Record = dsl::records
            .filter(dsl::id.eq(record_id))
            .first(&mut conn)
            .await?;

        if Layer::from(record.layer.clone()) >= target {
            return Ok(record);
        }

        let record = diesel::update(dsl::records.filter(dsl::id.eq(record_id)))
            .set((
                dsl::layer.eq(target.to_string()),
                dsl::updated_at.eq(Utc::now()),
            ))
            .get_result(&mut conn)
            .await?;
        Ok(record)
    }

    pub async fn mark_processed(pool: &DatabasePool, record_id: Uuid) -> AppResult<()> {
        use crate::schema::records::dsl;

        let mut conn = pool.get().await?;
        diesel::update(dsl::records.filter(dsl::id.eq(record_id)))
            .set((dsl::processed.eq(true), dsl::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Unprocessed bronze records, oldest first; the parse queue feeder.
    pub async fn unprocessed_bronze(pool: &DatabasePool, limit: i64) -> AppResult<Vec<Record>> {
        use crate::schema::records::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::records
            .filter(dsl::layer.eq(Layer::Bronze.to_string()))
            .filter(dsl::processed.eq(false))
            .order(dsl::captured_at.asc())
            .limit(limit)
            .load::<Record>(&mut conn)
            .await?;
        Ok(rows)
    }
}

async fn append_sighting(
    conn: &mut diesel_async::AsyncPgConnection,
    record_id: Uuid,
    candidate: &RecordCandidate,
    observed_at: DateTime<Utc>,
    content_hash: &str,
    prior_content: Option<&serde_json::Value>,
) -> AppResult<()> {
    let sighting = NewSighting {
        record_id,
        feed_name: &candidate.feed_name,
        observed_at,
        source_url: &candidate.source_url,
        source_updated_at: candidate.source_updated_at,
        content_hash,
        prior_content: prior_content.cloned(),
    };

    diesel::insert_into(record_sightings::dsl::record_sightings)
        .values(&sighting)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    fn candidate(feed: &str, key: &str) -> RecordCandidate {
        RecordCandidate {
            natural_key: key.to_string(),
            feed_name: feed.to_string(),
            source_url: "https://www.sec.gov/cgi-bin/browse-edgar?action=getcurrent".to_string(),
            published_at: Some(Utc::now() - Duration::minutes(5)),
            source_updated_at: None,
            raw_payload: serde_json::json!({
                "title": "10-K - APPLE INC",
                "accession": "0000320193-24-000081",
            }),
            cik: Some("0000320193".to_string()),
            form_type: Some("10-K".to_string()),
            filing_date: NaiveDate::from_ymd_opt(2024, 11, 1),
            accession_number: Some("000032019324000081".to_string()),
        }
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        // REQUIREMENT: content_hash is stable over normalized payload fields
        // PURPOSE: Two feeds serializing the same payload differently must agree

        let mut a = candidate("rss", "sec:filing:000032019324000081");
        let mut b = a.clone();
        a.raw_payload = serde_json::json!({"x": 1, "y": 2});
        b.raw_payload = serde_json::json!({"y": 2, "x": 1});

        assert_eq!(a.content_hash(), b.content_hash());

        b.raw_payload = serde_json::json!({"y": 2, "x": 3});
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_layer_ordering() {
        assert!(Layer::Bronze < Layer::Silver);
        assert!(Layer::Silver < Layer::Gold);
        assert_eq!(Layer::from("SILVER".to_string()), Layer::Silver);
        assert_eq!(Layer::from("unknown".to_string()), Layer::Bronze);
    }

    #[tokio::test]
    #[serial]
    async fn test_admit_dedup_across_feeds() {
        // REQUIREMENT: Two feeds yielding the same filing produce one Record
        // PURPOSE: Verify cross-feed deduplication by natural key with full
        // sighting history (spec scenario: rss, then daily, then quarterly)

        let container = TestContainer::new().await;
        let pool = container.pool();

        let key = "sec:filing:000032019324000081";
        let first = Record::admit(pool, &candidate("rss", key)).await.unwrap();
        assert_eq!(first.outcome, AdmitOutcome::New);

        let second = Record::admit_with_window(pool, &candidate("daily_index", key), 0)
            .await
            .unwrap();
        assert_eq!(second.outcome, AdmitOutcome::Resighted);
        assert_eq!(second.record.id, first.record.id);

        let third = Record::admit_with_window(pool, &candidate("full_index", key), 0)
            .await
            .unwrap();
        assert_eq!(third.outcome, AdmitOutcome::Resighted);

        let sightings = Record::sightings(pool, first.record.id).await.unwrap();
        assert_eq!(sightings.len(), 3);
        assert_eq!(sightings[0].feed_name, "rss");
        assert_eq!(sightings[1].feed_name, "daily_index");
        assert_eq!(sightings[2].feed_name, "full_index");
        // captured_at is the first admission time
        assert!(first.record.captured_at <= sightings[0].observed_at);
    }

    #[tokio::test]
    #[serial]
    async fn test_admit_same_feed_window_collapses() {
        // REQUIREMENT: Same-feed re-observations inside the window are collapsed
        // PURPOSE: A feed polled every minute must not pile up sighting rows

        let container = TestContainer::new().await;
        let pool = container.pool();

        let key = "sec:filing:000032019324000099";
        let first = Record::admit(pool, &candidate("rss", key)).await.unwrap();
        assert_eq!(first.outcome, AdmitOutcome::New);

        let repeat = Record::admit(pool, &candidate("rss", key)).await.unwrap();
        assert_eq!(repeat.outcome, AdmitOutcome::Duplicate);

        let sightings = Record::sightings(pool, first.record.id).await.unwrap();
        assert_eq!(sightings.len(), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_admit_modified_payload_keeps_prior_content() {
        // REQUIREMENT: Hash change flips was_modified and retains prior payload
        // PURPOSE: Amended source rows stay auditable through the sighting envelope

        let container = TestContainer::new().await;
        let pool = container.pool();

        let key = "sec:filing:000032019324000123";
        let first = Record::admit(pool, &candidate("rss", key)).await.unwrap();

        let mut changed = candidate("daily_index", key);
        changed.raw_payload = serde_json::json!({
            "title": "10-K/A - APPLE INC",
            "accession": "0000320193-24-000123",
        });
        let second = Record::admit_with_window(pool, &changed, 0).await.unwrap();
        assert_eq!(second.outcome, AdmitOutcome::Resighted);
        assert!(second.record.was_modified);

        let sightings = Record::sightings(pool, first.record.id).await.unwrap();
        assert_eq!(sightings.len(), 2);
        assert!(sightings[0].prior_content.is_none());
        assert_eq!(
            sightings[1].prior_content.as_ref().unwrap()["title"],
            "10-K - APPLE INC"
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_admit_is_idempotent_on_final_state() {
        // REQUIREMENT: Final record state is identical regardless of duplicate count
        // PURPOSE: Verify the admit idempotence law

        let container = TestContainer::new().await;
        let pool = container.pool();

        let key = "sec:filing:000032019324000200";
        let first = Record::admit_with_window(pool, &candidate("rss", key), 0)
            .await
            .unwrap();
        for _ in 0..3 {
            Record::admit_with_window(pool, &candidate("rss", key), 0)
                .await
                .unwrap();
        }

        let after = Record::find_by_natural_key(pool, key).await.unwrap().unwrap();
        assert_eq!(after.content_hash, first.record.content_hash);
        assert_eq!(after.captured_at, first.record.captured_at);
        assert!(!after.was_modified);
    }

    #[tokio::test]
    #[serial]
    async fn test_layer_promotion_is_monotone() {
        // REQUIREMENT: Layer promotions are monotone
        // PURPOSE: A stale worker must not demote a record back to bronze

        let container = TestContainer::new().await;
        let pool = container.pool();

        let admitted = Record::admit(pool, &candidate("rss", "sec:filing:000032019324000300"))
            .await
            .unwrap();

        let silver = Record::promote(pool, admitted.record.id, Layer::Silver)
            .await
            .unwrap();
        assert_eq!(Layer::from(silver.layer.clone()), Layer::Silver);

        let still_silver = Record::promote(pool, admitted.record.id, Layer::Bronze)
            .await
            .unwrap();
        assert_eq!(Layer::from(still_silver.layer), Layer::Silver);
    }
}
