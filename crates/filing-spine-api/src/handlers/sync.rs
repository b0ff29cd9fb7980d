use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use filing_spine_core::AppError;
use filing_spine_ingest::feeds::FeedAdapter;
use filing_spine_ingest::{DailyIndexAdapter, FullIndexAdapter};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncStartRequest {
    /// "daily" or "full"
    pub feed: String,
    /// Backfill start when no checkpoint exists
    pub start: Option<NaiveDate>,
}

/// POST /sync: start a backfill job; progress streams from
/// /sync/{job_id}/stream.
pub async fn start_sync(
    state: AppState,
    request: SyncStartRequest,
) -> Result<impl warp::Reply, warp::Rejection> {
    let start = request
        .start
        .unwrap_or_else(|| chrono::Utc::now().date_naive() - chrono::Duration::days(30));

    let adapter: Arc<dyn FeedAdapter> = match request.feed.as_str() {
        "daily" => Arc::new(DailyIndexAdapter::new(state.sec_client.clone(), start)),
        "full" => Arc::new(FullIndexAdapter::new(
            state.sec_client.clone(),
            start.year(),
            1,
        )),
        other => {
            return Err(warp::reject::custom(AppError::bad_request(format!(
                "unknown feed {:?}, expected daily or full",
                other
            ))))
        }
    };

    let job_id = state
        .sync
        .start_backfill(state.collector.clone(), adapter, state.shutdown.clone())
        .await;

    Ok(warp::reply::json(&json!({
        "data": { "job_id": job_id },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
