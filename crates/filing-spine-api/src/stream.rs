//! Streaming endpoints: the admitted-filings WebSocket and the sync-job
//! SSE progress channel.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use filing_spine_core::AppError;
use filing_spine_ingest::FeedFrame;

use crate::server::AppState;

/// /feed/stream: push one JSON frame per admitted filing. Slow consumers
/// that fall behind the broadcast buffer are disconnected rather than
/// stalling the feed.
pub async fn feed_websocket(socket: WebSocket, mut events: broadcast::Receiver<FeedFrame>) {
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            frame = events.recv() => {
                match frame {
                    Ok(frame) => {
                        let Ok(body) = serde_json::to_string(&frame) else {
                            continue;
                        };
                        if tx.send(Message::text(body)).await.is_err() {
                            debug!("feed stream client disconnected");
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "feed stream client lagged, closing");
                        let _ = tx.send(Message::close()).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(Message::close()).await;
                        return;
                    }
                }
            }
            incoming = rx.next() => {
                match incoming {
                    // Clients only ever close or ping; any close ends the session
                    Some(Ok(msg)) if msg.is_close() => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => return,
                }
            }
        }
    }
}

/// /sync/{job_id}/stream: SSE progress events for a sync job
pub async fn sync_sse(
    job_id: Uuid,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let receiver = state
        .sync
        .subscribe(job_id)
        .await
        .ok_or_else(|| warp::reject::custom(AppError::not_found(format!("sync job {}", job_id))))?;

    let stream = BroadcastStream::new(receiver).filter_map(|progress| async move {
        match progress {
            Ok(progress) => {
                let data = serde_json::to_string(&progress).ok()?;
                Some(Ok::<_, std::convert::Infallible>(
                    warp::sse::Event::default().event("progress").data(data),
                ))
            }
            // A lagged subscriber just misses frames; the stream continues
            Err(_) => None,
        }
    });

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
