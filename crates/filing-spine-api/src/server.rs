use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use warp::Filter;
use uuid::Uuid;

use filing_spine_core::{handle_rejection, Config, DatabasePool};
use filing_spine_ingest::{FeedCollector, FeedFrame, SecClient};
use filing_spine_services::SyncService;

use crate::handlers;
use crate::stream;

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub config: Config,
    pub feed_events: broadcast::Sender<FeedFrame>,
    pub collector: Arc<FeedCollector>,
    pub sec_client: SecClient,
    pub sync: Arc<SyncService>,
    pub shutdown: watch::Receiver<bool>,
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// The full route tree of spec'd endpoints
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and_then(handlers::health::health_check);

    let filings_list = warp::path!("filings")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<handlers::filings::FilingListParams>())
        .and_then(handlers::filings::list_filings);

    let filing_detail = warp::path!("filings" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::filings::get_filing);

    let section_context = warp::path!("filings" / String / "sections" / String / "context")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<handlers::filings::ContextParams>())
        .and_then(handlers::filings::get_section_context);

    let entity_resolve = warp::path!("entities" / "resolve")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<handlers::entities::ResolveParams>())
        .and_then(handlers::entities::resolve_entity);

    let entity_detail = warp::path!("entities" / Uuid)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::entities::get_entity);

    let entity_history = warp::path!("entities" / Uuid / "history")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::entities::get_entity_history);

    let mention_evidence = warp::path!("mentions" / Uuid / "evidence")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::mentions::get_mention_evidence);

    let graph_suppliers = warp::path!("graph" / "suppliers" / Uuid)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<handlers::graph::GraphParams>())
        .and_then(handlers::graph::get_suppliers);

    let feed_stream = warp::path!("feed" / "stream")
        .and(warp::ws())
        .and(with_state(state.clone()))
        .map(|ws: warp::ws::Ws, state: AppState| {
            ws.on_upgrade(move |socket| stream::feed_websocket(socket, state.feed_events.subscribe()))
        });

    let sync_start = warp::path!("sync")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::json::<handlers::sync::SyncStartRequest>())
        .and_then(handlers::sync::start_sync);

    let sync_stream = warp::path!("sync" / Uuid / "stream")
        .and(warp::get())
        .and(with_state(state))
        .and_then(stream::sync_sse);

    health
        .or(filings_list)
        .or(filing_detail)
        .or(section_context)
        .or(entity_resolve)
        .or(entity_detail)
        .or(entity_history)
        .or(mention_evidence)
        .or(graph_suppliers)
        .or(feed_stream)
        .or(sync_start)
        .or(sync_stream)
        .recover(handle_rejection)
}
