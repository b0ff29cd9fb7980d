use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::database::DatabasePool;
use crate::error::AppResult;
use crate::schema::filing_events;

/// A typed event produced by the 8-K item router
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = filing_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FilingEvent {
    pub id: Uuid,
    pub accession_number: String,
    pub event_type: String,
    pub item_code: String,
    pub description: Option<String>,
    pub entity_id: Option<Uuid>,
    pub occurred_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Validate, Deserialize)]
#[diesel(table_name = filing_events)]
pub struct NewFilingEvent {
    #[validate(length(min = 18, max = 20))]
    pub accession_number: String,
    #[validate(length(min = 1, max = 50))]
    pub event_type: String,
    #[validate(length(min = 1, max = 10))]
    pub item_code: String,
    pub description: Option<String>,
    pub entity_id: Option<Uuid>,
    pub occurred_on: NaiveDate,
}

impl FilingEvent {
    pub async fn create(pool: &DatabasePool, new_event: &NewFilingEvent) -> AppResult<FilingEvent> {
        use crate::schema::filing_events::dsl;

        new_event.validate()?;

        let mut conn = pool.get().await?;
        let event = diesel::insert_into(dsl::filing_events)
            .values(new_event)
            .get_result(&mut conn)
            .await?;
        Ok(event)
    }

    pub async fn for_accession(pool: &DatabasePool, accession: &str) -> AppResult<Vec<FilingEvent>> {
        use crate::schema::filing_events::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::filing_events
            .filter(dsl::accession_number.eq(accession))
            .order(dsl::item_code.asc())
            .load::<FilingEvent>(&mut conn)
            .await?;
        Ok(rows)
    }
}
