use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::DatabasePool;
use crate::error::AppResult;
use crate::schema::validation_events;

/// Durable sink for parser defects, integrity violations and redirect
/// cycles. Validation events never stall the pipeline; they exist so
/// defects surface instead of disappearing into logs.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = validation_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ValidationEvent {
    pub id: Uuid,
    pub source: String,
    pub accession_number: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ValidationEvent {
    pub async fn record(
        pool: &DatabasePool,
        source: &str,
        accession_number: Option<&str>,
        detail: serde_json::Value,
    ) -> AppResult<ValidationEvent> {
        use crate::schema::validation_events::dsl;

        tracing::warn!(source, ?accession_number, %detail, "validation event");

        let mut conn = pool.get().await?;
        let event = diesel::insert_into(dsl::validation_events)
            .values((
                dsl::source.eq(source),
                dsl::accession_number.eq(accession_number),
                dsl::detail.eq(detail),
            ))
            .get_result(&mut conn)
            .await?;
        Ok(event)
    }

    pub async fn recent(pool: &DatabasePool, limit: i64) -> AppResult<Vec<ValidationEvent>> {
        use crate::schema::validation_events::dsl;

        let mut conn = pool.get().await?;
        let rows = dsl::validation_events
            .order(dsl::created_at.desc())
            .limit(limit)
            .load::<ValidationEvent>(&mut conn)
            .await?;
        Ok(rows)
    }
}
