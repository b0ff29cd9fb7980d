//! Pipeline worker daemon: consumes the four stage queues with a
//! configurable number of consumers per queue.

use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filing_spine_core::models::queues;
use filing_spine_core::{create_pool, database, Config};
use filing_spine_ingest::{DocumentStore, FilingFetcher, SecClient, SecRateLimiter};
use filing_spine_services::{run_worker, PipelineDeps};

#[derive(Parser, Debug)]
#[command(name = "spine-worker", about = "Filing pipeline worker")]
struct Args {
    /// Queues to consume (defaults to all four stages)
    #[arg(long)]
    queue: Vec<String>,

    /// Consumers per queue
    #[arg(long, default_value_t = 0)]
    concurrency: usize,

    /// Minutes before a lock from a crashed worker is recovered
    #[arg(long, default_value_t = 30)]
    stuck_timeout_minutes: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    database::run_migrations(&config.database_url).await?;

    let rate_limiter = SecRateLimiter::new(config.sec.requests_per_second)?;
    let client = SecClient::new(&config.sec, rate_limiter)?;
    let store = DocumentStore::new(config.sec.data_dir.clone());
    let fetcher = FilingFetcher::new(client, store.clone());

    let deps = Arc::new(PipelineDeps::new(pool.clone(), config.clone(), fetcher, store));
    deps.name_cache.refresh(&pool).await?;

    let all_queues = [
        queues::FILINGS_PARSE,
        queues::SECTIONS_MENTIONS,
        queues::MENTIONS_RESOLVE,
        queues::RESOLVED_GRAPH,
    ];
    let selected: Vec<&'static str> = if args.queue.is_empty() {
        all_queues.to_vec()
    } else {
        all_queues
            .into_iter()
            .filter(|q| args.queue.iter().any(|sel| sel == q))
            .collect()
    };
    let concurrency = if args.concurrency == 0 {
        config.worker.max_concurrent_jobs.max(1)
    } else {
        args.concurrency
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for queue in &selected {
        for i in 0..concurrency {
            let deps = deps.clone();
            let worker_id = format!("{}:{}:{}", hostname(), queue, i);
            let shutdown = shutdown_rx.clone();
            let queue = *queue;
            handles.push(tokio::spawn(async move {
                run_worker(deps, queue, worker_id, shutdown).await;
            }));
        }
    }

    // Periodic recovery of locks left by crashed workers
    {
        let pool = pool.clone();
        let mut shutdown = shutdown_rx.clone();
        let timeout = args.stuck_timeout_minutes;
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(300)) => {
                        match filing_spine_services::queue::unlock_stuck_tasks(&pool, timeout).await {
                            Ok(0) => {}
                            Ok(n) => info!(recovered = n, "recovered stuck tasks"),
                            Err(e) => tracing::error!(error = %e, "stuck-task recovery failed"),
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        }));
    }

    info!(
        queues = selected.len(),
        concurrency, "pipeline workers running"
    );

    signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();
    for handle in handles {
        handle.await.ok();
    }

    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("pid-{}", std::process::id()))
}
