//! Feed collector daemon: polls the SEC publication channels, admits
//! candidates into the record store and keeps symbology fresh.

use chrono::{Datelike, Utc};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filing_spine_core::{create_pool, database, Config};
use filing_spine_ingest::feeds::FeedAdapter;
use filing_spine_ingest::{
    DailyIndexAdapter, FeedCollector, FullIndexAdapter, RssFeedAdapter, SecClient, SecRateLimiter,
    SymbologyRefresher,
};

#[derive(Parser, Debug)]
#[command(name = "spine-collector", about = "SEC feed collector daemon")]
struct Args {
    /// Backfill start date for the daily index (YYYY-MM-DD)
    #[arg(long, default_value = "2024-01-01")]
    daily_start: String,

    /// Backfill start quarter for the full index (e.g. 2023-Q1)
    #[arg(long)]
    full_start: Option<String>,

    /// Disable the real-time feed adapter
    #[arg(long, default_value_t = false)]
    no_rss: bool,

    /// Symbology refresh interval as a cron expression
    #[arg(long, default_value = "0 0 6 * * *")]
    symbology_cron: String,
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

    let daily_start = chrono::NaiveDate::parse_from_str(&args.daily_start, "%Y-%m-%d")?;

    let mut adapters: Vec<Arc<dyn FeedAdapter>> = Vec::new();
    if !args.no_rss {
        adapters.push(Arc::new(RssFeedAdapter::new(client.clone())));
    }
    adapters.push(Arc::new(DailyIndexAdapter::new(client.clone(), daily_start)));
    if let Some(full_start) = &args.full_start {
        let (year, quarter) = full_start
            .split_once("-Q")
            .and_then(|(y, q)| Some((y.parse().ok()?, q.parse().ok()?)))
            .ok_or_else(|| anyhow::anyhow!("invalid --full-start, expected YYYY-Qn"))?;
        adapters.push(Arc::new(FullIndexAdapter::new(client.clone(), year, quarter)));
    } else {
        let today = Utc::now().date_naive();
        adapters.push(Arc::new(FullIndexAdapter::new(
            client.clone(),
            today.year() - 1,
            1,
        )));
    }

    let collector = Arc::new(FeedCollector::new(pool.clone(), config.worker.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic symbology refresh keeps the resolver's claims current
    let symbology = SymbologyRefresher::new(client.clone(), pool.clone());
    let mut scheduler = tokio_cron_scheduler::JobScheduler::new().await?;
    let symbology = Arc::new(symbology);
    {
        let symbology = symbology.clone();
        scheduler
            .add(tokio_cron_scheduler::Job::new_async(
                args.symbology_cron.as_str(),
                move |_uuid, _l| {
                    let symbology = symbology.clone();
                    Box::pin(async move {
                        if let Err(e) = symbology.refresh().await {
                            error!(error = %e, "symbology refresh failed");
                        }
                    })
                },
            )?)
            .await?;
    }
    scheduler.start().await?;

    info!(adapters = adapters.len(), "feed collector starting");

    let run_handle = {
        let collector = collector.clone();
        tokio::spawn(async move { collector.run(adapters, shutdown_rx).await })
    };

    signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();
    scheduler.shutdown().await.ok();
    run_handle.await?;

    Ok(())
}
