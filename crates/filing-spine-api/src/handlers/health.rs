use serde_json::json;
use std::convert::Infallible;

pub async fn health_check() -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "service": "filing-spine-api",
        "version": env!("CARGO_PKG_VERSION")
    })))
}
