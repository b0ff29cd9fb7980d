//! API process: serves the HTTP/WS/SSE surface and (by default) embeds the
//! feed collector so /feed/stream has a live frame source.

use chrono::Datelike;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filing_spine_api::{routes, AppState};
use filing_spine_core::{create_pool, database, Config};
use filing_spine_ingest::feeds::FeedAdapter;
use filing_spine_ingest::{
    DailyIndexAdapter, FeedCollector, FullIndexAdapter, RssFeedAdapter, SecClient, SecRateLimiter,
};
use filing_spine_services::SyncService;

#[derive(Parser, Debug)]
#[command(name = "spine-api", about = "Filing spine API server")]
struct Args {
    /// Run without the embedded feed collector
    #[arg(long, default_value_t = false)]
    no_collector: bool,

    /// Daily index backfill start when no checkpoint exists
    #[arg(long, default_value = "2024-01-01")]
    daily_start: String,
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

    let collector = Arc::new(FeedCollector::new(pool.clone(), config.worker.clone()));
    let sync = Arc::new(SyncService::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rate_limiter = SecRateLimiter::new(config.sec.requests_per_second)?;
    let client = SecClient::new(&config.sec, rate_limiter)?;

    let mut collector_handle = None;
    if !args.no_collector {
        let daily_start = chrono::NaiveDate::parse_from_str(&args.daily_start, "%Y-%m-%d")?;
        let today = chrono::Utc::now().date_naive();

        let adapters: Vec<Arc<dyn FeedAdapter>> = vec![
            Arc::new(RssFeedAdapter::new(client.clone())),
            Arc::new(DailyIndexAdapter::new(client.clone(), daily_start)),
            Arc::new(FullIndexAdapter::new(client.clone(), today.year() - 1, 1)),
        ];

        let collector = collector.clone();
        let shutdown = shutdown_rx.clone();
        collector_handle = Some(tokio::spawn(async move {
            collector.run(adapters, shutdown).await;
        }));
    }

    let state = AppState {
        pool,
        config: config.clone(),
        feed_events: collector.event_sender(),
        collector,
        sec_client: client,
        sync,
        shutdown: shutdown_rx.clone(),
    };

    let addr: std::net::SocketAddr =
        format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "filing-spine api listening");

    let mut server_shutdown = shutdown_rx.clone();
    let (_, server) =
        warp::serve(routes(state)).bind_with_graceful_shutdown(addr, async move {
            let _ = server_shutdown.changed().await;
        });
    let server_handle = tokio::spawn(server);

    signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();
    server_handle.await.ok();
    if let Some(handle) = collector_handle {
        handle.await.ok();
    }

    Ok(())
}
