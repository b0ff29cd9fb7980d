//! Feed adapters for the SEC publication channels.
//!
//! An adapter pulls records from one channel and yields candidates keyed by
//! the feed-independent natural key. Adapters know nothing about
//! deduplication: yielding the same key many times is legal and expected,
//! the record store collapses it.

pub mod atom;
pub mod index;

use async_trait::async_trait;

use filing_spine_core::models::RecordCandidate;
use filing_spine_core::AppResult;

pub use atom::RssFeedAdapter;
pub use index::{DailyIndexAdapter, FullIndexAdapter};

/// A source row the adapter could not turn into a candidate. Poison rows
/// are quarantined as validation events without stalling the cursor.
#[derive(Debug, Clone)]
pub struct PoisonRecord {
    pub reason: String,
    pub payload: serde_json::Value,
}

/// One fetch worth of feed output
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub candidates: Vec<RecordCandidate>,
    pub poison: Vec<PoisonRecord>,
    /// Cursor to commit once the batch is durably admitted. None leaves the
    /// prior cursor in place.
    pub next_cursor: Option<Vec<u8>>,
    /// True when the channel has no further backlog behind this batch
    pub end_of_stream: bool,
}

/// A named producer over one SEC publication channel.
///
/// Transient failures return Err and leave the cursor untouched; the
/// collector retries with backoff. Rows that fail to parse are returned in
/// the poison list rather than failing the batch.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    fn feed_name(&self) -> &'static str;

    async fn fetch(&self, cursor: Option<Vec<u8>>) -> AppResult<FeedBatch>;
}
