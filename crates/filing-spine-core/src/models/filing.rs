use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::{AppError, AppResult};
use crate::schema::filings;

/// Silver-layer filing: exactly one row per accession number
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = filings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Filing {
    pub id: Uuid,
    pub accession_number: String,
    pub filer_cik: String,
    pub form_type: String,
    pub filed_date: NaiveDate,
    pub acceptance_datetime: Option<DateTime<Utc>>,
    pub report_date: Option<NaiveDate>,
    pub entity_id: Option<Uuid>,
    pub primary_document_url: Option<String>,
    pub source_record_ids: Vec<Option<Uuid>>,
    pub sections_extracted: bool,
    pub mentions_extracted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New filing for insertion
#[derive(Debug, Clone, Insertable, Validate, Deserialize)]
#[diesel(table_name = filings)]
pub struct NewFiling {
    #[validate(length(min = 18, max = 20))]
    pub accession_number: String,
    #[validate(length(min = 1, max = 10))]
    pub filer_cik: String,
    #[validate(length(min = 1, max = 20))]
    pub form_type: String,
    pub filed_date: NaiveDate,
    pub acceptance_datetime: Option<DateTime<Utc>>,
    pub report_date: Option<NaiveDate>,
    pub primary_document_url: Option<String>,
    pub source_record_ids: Vec<Option<Uuid>>,
}

/// Filter parameters for listing filings
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct FilingFilter {
    pub cik: Option<String>,
    pub form_type: Option<String>,
    pub filed_after: Option<NaiveDate>,
    pub filed_before: Option<NaiveDate>,
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

impl Filing {
    /// Bronze -> Silver promotion. The first promotion inserts the row;
    /// later promotions from other feeds only append their record id to
    /// source_record_ids, so the one-row-per-accession invariant holds.
    pub async fn upsert_from_record(
        pool: &DatabasePool,
        new_filing: &NewFiling,
        record_id: Uuid,
    ) -> AppResult<Filing> {
        use crate::schema::filings::dsl;

        new_filing.validate()?;

        let mut conn = pool.get().await?;
        let new_filing = new_filing.clone();

        conn.transaction::<Filing, AppError, _>(|conn| {
            async move {
                let existing: Option<Filing> = dsl::filings
                    .filter(dsl::accession_number.eq(&new_filing.accession_number))
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                match existing {
                    Some(filing) => {
                        if filing.source_record_ids.contains(&Some(record_id)) {
                            return Ok(filing);
                        }
                        let mut ids = filing.source_record_ids.clone();
                        ids.push(Some(record_id));
                        let filing =
                            diesel::update(dsl::filings.filter(dsl::id.eq(filing.id)))
                                .set((
                                    dsl::source_record_ids.eq(ids),
                                    dsl::updated_at.eq(Utc::now()),
                                ))
                                .get_result(conn)
                                .await?;
                        Ok(filing)
                    }
                    None => {
                        let mut to_insert = new_filing.clone();
                        if !to_insert.source_record_ids.contains(&Some(record_id)) {
                            to_insert.source_record_ids.push(Some(record_id));
                        }
                        let filing = diesel::insert_into(dsl::filings)
                            .values(&to_insert)
                            .get_result(conn)
                            .await?;
                        Ok(filing)
                    }
                }
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn find_by_accession(
        pool: &DatabasePool,
        accession: &str,
    ) -> AppResult<Option<Filing>> {
        use crate::schema::filings::dsl;

        let mut conn = pool.get().await?;
        let filing = dsl::filings
            .filter(dsl::accession_number.eq(accession))
            .first::<Filing>(&mut conn)
            .await
            .optional()?;
        Ok(filing)
    }

    pub async fn list(pool: &DatabasePool, filter: &FilingFilter) -> AppResult<Vec<Filing>> {
        use crate::schema::filings::dsl;

        filter.validate()?;

        let mut conn = pool.get().await?;
        let mut query = dsl::filings.into_boxed();

        if let Some(ref cik) = filter.cik {
            query = query.filter(dsl::filer_cik.eq(cik.clone()));
        }
        if let Some(ref form) = filter.form_type {
            query = query.filter(dsl::form_type.eq(form.clone()));
        }
        if let Some(after) = filter.filed_after {
            query = query.filter(dsl::filed_date.ge(after));
        }
        if let Some(before) = filter.filed_before {
            query = query.filter(dsl::filed_date.le(before));
        }

        let rows = query
            .order(dsl::filed_date.desc())
            .limit(filter.limit.unwrap_or(100))
            .offset(filter.offset.unwrap_or(0))
            .load::<Filing>(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Most recent prior filing of the same form by the same filer; drives
    /// exhibit-derived relationship closure.
    pub async fn previous_of_form(
        pool: &DatabasePool,
        filer_cik: &str,
        form_type: &str,
        before: NaiveDate,
    ) -> AppResult<Option<Filing>> {
        use crate::schema::filings::dsl;

        let mut conn = pool.get().await?;
        let filing = dsl::filings
            .filter(dsl::filer_cik.eq(filer_cik))
            .filter(dsl::form_type.eq(form_type))
            .filter(dsl::filed_date.lt(before))
            .order(dsl::filed_date.desc())
            .first::<Filing>(&mut conn)
            .await
            .optional()?;
        Ok(filing)
    }

    pub async fn set_entity(pool: &DatabasePool, filing_id: Uuid, entity_id: Uuid) -> AppResult<()> {
        use crate::schema::filings::dsl;

        let mut conn = pool.get().await?;
        diesel::update(dsl::filings.filter(dsl::id.eq(filing_id)))
            .set((dsl::entity_id.eq(entity_id), dsl::updated_at.eq(Utc::now())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn mark_sections_extracted(pool: &DatabasePool, filing_id: Uuid) -> AppResult<()> {
        Self::set_flag(pool, filing_id, Flag::Sections).await
    }

    pub async fn mark_mentions_extracted(pool: &DatabasePool, filing_id: Uuid) -> AppResult<()> {
        Self::set_flag(pool, filing_id, Flag::Mentions).await
    }

    async fn set_flag(pool: &DatabasePool, filing_id: Uuid, flag: Flag) -> AppResult<()> {
        use crate::schema::filings::dsl;

        let mut conn = pool.get().await?;
        match flag {
            Flag::Sections => {
                diesel::update(dsl::filings.filter(dsl::id.eq(filing_id)))
                    .set((
                        dsl::sections_extracted.eq(true),
                        dsl::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            Flag::Mentions => {
                diesel::update(dsl::filings.filter(dsl::id.eq(filing_id)))
                    .set((
                        dsl::mentions_extracted.eq(true),
                        dsl::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }
}

enum Flag {
    Sections,
    Mentions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestContainer;
    use serial_test::serial;

    fn new_filing(accession: &str) -> NewFiling {
        NewFiling {
            accession_number: accession.to_string(),
            filer_cik: "0000320193".to_string(),
            form_type: "10-K".to_string(),
            filed_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            acceptance_datetime: None,
            report_date: NaiveDate::from_ymd_opt(2024, 9, 28),
            primary_document_url: Some(
                "https://www.sec.gov/Archives/edgar/data/320193/000032019324000081/aapl-20240928.htm"
                    .to_string(),
            ),
            source_record_ids: vec![],
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_one_filing_per_accession() {
        // REQUIREMENT: At most one Silver filing per accession number
        // PURPOSE: Promotions from redundant feeds must collapse onto one row

        let container = TestContainer::new().await;
        let pool = container.pool();

        let rec_a = Uuid::new_v4();
        let rec_b = Uuid::new_v4();

        let first = Filing::upsert_from_record(pool, &new_filing("000032019324000081"), rec_a)
            .await
            .unwrap();
        let second = Filing::upsert_from_record(pool, &new_filing("000032019324000081"), rec_b)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.source_record_ids.len(), 2);

        // Re-promoting from the same record is a no-op
        let third = Filing::upsert_from_record(pool, &new_filing("000032019324000081"), rec_a)
            .await
            .unwrap();
        assert_eq!(third.source_record_ids.len(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_list_filters_and_previous_of_form() {
        // REQUIREMENT: Filing listing supports cik/form/date-range filters
        // PURPOSE: Verify the query surface the HTTP layer exposes

        let container = TestContainer::new().await;
        let pool = container.pool();

        let mut older = new_filing("000032019323000106");
        older.filed_date = NaiveDate::from_ymd_opt(2023, 11, 3).unwrap();
        Filing::upsert_from_record(pool, &older, Uuid::new_v4())
            .await
            .unwrap();
        Filing::upsert_from_record(pool, &new_filing("000032019324000081"), Uuid::new_v4())
            .await
            .unwrap();

        let filter = FilingFilter {
            cik: Some("0000320193".to_string()),
            form_type: Some("10-K".to_string()),
            filed_after: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        let rows = Filing::list(pool, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].accession_number, "000032019324000081");

        let prior = Filing::previous_of_form(
            pool,
            "0000320193",
            "10-K",
            NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(prior.accession_number, "000032019323000106");
    }
}
