use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

use filing_spine_core::config::WorkerConfig;
use filing_spine_core::models::{
    queues, AdmitOutcome, FeedCheckpoint, NewQueueTask, QueueTask, Record, ValidationEvent,
};
use filing_spine_core::{AppResult, DatabasePool};

use crate::feeds::{FeedAdapter, FeedBatch};

/// Frame pushed to stream subscribers for every admitted filing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFrame {
    pub natural_key: String,
    pub feed_name: String,
    pub outcome: String,
    pub accession_number: Option<String>,
    pub cik: Option<String>,
    pub form_type: Option<String>,
}

/// Drives the feed adapters: fetch, admit, enqueue parse work, commit the
/// checkpoint. The checkpoint is written only after the batch it covers is
/// durably admitted; a crash in between re-fetches from the prior cursor
/// and dedup absorbs the replay.
pub struct FeedCollector {
    pool: DatabasePool,
    worker: WorkerConfig,
    events: broadcast::Sender<FeedFrame>,
}

impl FeedCollector {
    pub fn new(pool: DatabasePool, worker: WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            pool,
            worker,
            events,
        }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Subscribe to admitted-filing frames (the /feed/stream source)
    pub fn subscribe(&self) -> broadcast::Receiver<FeedFrame> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<FeedFrame> {
        self.events.clone()
    }

    /// One fetch-admit-checkpoint cycle for an adapter. Returns the number
    /// of newly admitted records.
    pub async fn poll_once(&self, adapter: &dyn FeedAdapter) -> AppResult<usize> {
        let feed = adapter.feed_name();
        let cursor = FeedCheckpoint::get(&self.pool, feed).await?;

        let batch: FeedBatch = adapter.fetch(cursor).await?;

        for poison in &batch.poison {
            ValidationEvent::record(
                &self.pool,
                feed,
                None,
                serde_json::json!({
                    "reason": poison.reason,
                    "payload": poison.payload,
                }),
            )
            .await?;
        }

        let mut new_records = 0;
        for candidate in &batch.candidates {
            let admitted = Record::admit(&self.pool, candidate).await?;

            if admitted.outcome == AdmitOutcome::New {
                new_records += 1;
                self.enqueue_parse(candidate).await?;
            }

            if admitted.outcome != AdmitOutcome::Duplicate {
                let _ = self.events.send(FeedFrame {
                    natural_key: candidate.natural_key.clone(),
                    feed_name: feed.to_string(),
                    outcome: match admitted.outcome {
                        AdmitOutcome::New => "NEW",
                        AdmitOutcome::Resighted => "RESIGHTED",
                        AdmitOutcome::Duplicate => "DUPLICATE",
                    }
                    .to_string(),
                    accession_number: candidate.accession_number.clone(),
                    cik: candidate.cik.clone(),
                    form_type: candidate.form_type.clone(),
                });
            }
        }

        // Admits are durable; only now may the cursor advance
        if let Some(next_cursor) = &batch.next_cursor {
            FeedCheckpoint::set(&self.pool, feed, next_cursor).await?;
        }

        info!(
            feed,
            candidates = batch.candidates.len(),
            new_records,
            poison = batch.poison.len(),
            end_of_stream = batch.end_of_stream,
            "feed batch admitted"
        );

        Ok(new_records)
    }

    /// Enqueue the Bronze -> Silver parse task, blocking cooperatively while
    /// the downstream queue sits above its high-water mark.
    async fn enqueue_parse(&self, candidate: &filing_spine_core::models::RecordCandidate) -> AppResult<()> {
        let Some(accession) = &candidate.accession_number else {
            return Ok(());
        };

        loop {
            let depth = QueueTask::depth(&self.pool, queues::FILINGS_PARSE).await?;
            if depth < self.worker.queue_high_water {
                break;
            }
            warn!(
                queue = queues::FILINGS_PARSE,
                depth, "queue above high-water mark, producer waiting"
            );
            sleep(Duration::from_secs(1)).await;
        }

        QueueTask::enqueue(
            &self.pool,
            &NewQueueTask {
                queue: queues::FILINGS_PARSE.to_string(),
                task_key: candidate.natural_key.clone(),
                payload: serde_json::json!({
                    "accession_number": accession,
                    "cik": candidate.cik,
                    "form_type": candidate.form_type,
                    "filing_date": candidate.filing_date,
                    "natural_key": candidate.natural_key,
                }),
                priority: 5,
                max_retries: self.worker.max_attempts,
                scheduled_for: None,
            },
        )
        .await?;
        Ok(())
    }

    /// Poll an adapter until its backlog drains or shutdown is requested
    pub async fn drain(
        &self,
        adapter: &dyn FeedAdapter,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AppResult<usize> {
        let mut total = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(total);
            }
            let feed = adapter.feed_name();
            let cursor = FeedCheckpoint::get(&self.pool, feed).await?;
            let before = cursor.clone();
            total += self.poll_once(adapter).await?;
            let after = FeedCheckpoint::get(&self.pool, feed).await?;
            // No cursor movement means the channel is drained
            if before == after {
                return Ok(total);
            }
        }
    }

    /// Long-running loop over a set of adapters with a fixed poll interval.
    /// Transient fetch errors back off and leave the checkpoint untouched.
    pub async fn run(
        &self,
        adapters: Vec<Arc<dyn FeedAdapter>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(self.worker.poll_interval_seconds.max(1));

        loop {
            for adapter in &adapters {
                if *shutdown.borrow() {
                    info!("feed collector stopping");
                    return;
                }
                if let Err(e) = self.poll_once(adapter.as_ref()).await {
                    error!(feed = adapter.feed_name(), error = %e, "feed poll failed, will retry");
                }
            }

            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("feed collector stopping");
                    return;
                }
            }
        }
    }
}
