//! Sync jobs: long-running backfills driven through a feed adapter, with
//! progress frames broadcast to SSE subscribers and the CLI.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use filing_spine_core::models::FeedCheckpoint;
use filing_spine_ingest::feeds::FeedAdapter;
use filing_spine_ingest::FeedCollector;

/// One progress frame of a sync job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub job_id: Uuid,
    pub feed_name: String,
    pub batches: usize,
    pub records_admitted: usize,
    pub done: bool,
    pub error: Option<String>,
}

/// Registry of running sync jobs and their progress channels
#[derive(Default)]
pub struct SyncService {
    jobs: RwLock<HashMap<Uuid, broadcast::Sender<SyncProgress>>>,
}

impl SyncService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress stream for a job; None when the job id is unknown
    pub async fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<SyncProgress>> {
        self.jobs.read().await.get(&job_id).map(|tx| tx.subscribe())
    }

    /// Drive an adapter until its backlog drains, emitting a progress frame
    /// per batch. Returns the job id immediately; the work runs in the
    /// background.
    pub async fn start_backfill(
        self: &Arc<Self>,
        collector: Arc<FeedCollector>,
        adapter: Arc<dyn FeedAdapter>,
        shutdown: watch::Receiver<bool>,
    ) -> Uuid {
        let job_id = Uuid::new_v4();
        let (tx, _) = broadcast::channel(256);
        self.jobs.write().await.insert(job_id, tx.clone());

        let service = self.clone();
        tokio::spawn(async move {
            let feed = adapter.feed_name().to_string();
            info!(%job_id, feed, "sync job started");

            let mut batches = 0;
            let mut records_admitted = 0;
            let mut error = None;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                let before = FeedCheckpoint::get(collector.pool(), &feed).await.ok();
                match collector.poll_once(adapter.as_ref()).await {
                    Ok(admitted) => {
                        batches += 1;
                        records_admitted += admitted;
                        let _ = tx.send(SyncProgress {
                            job_id,
                            feed_name: feed.clone(),
                            batches,
                            records_admitted,
                            done: false,
                            error: None,
                        });
                        let after = FeedCheckpoint::get(collector.pool(), &feed).await.ok();
                        // No cursor movement means the backlog is drained
                        if before == after {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(%job_id, feed, error = %e, "sync job failed");
                        error = Some(e.to_string());
                        break;
                    }
                }
            }

            let _ = tx.send(SyncProgress {
                job_id,
                feed_name: feed.clone(),
                batches,
                records_admitted,
                done: true,
                error,
            });
            info!(%job_id, feed, batches, records_admitted, "sync job finished");

            // The entry stays registered so late subscribers get a closed
            // stream rather than a 404 for a just-finished job
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            service.jobs.write().await.remove(&job_id);
        });

        job_id
    }
}
