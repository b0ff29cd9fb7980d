//! HTTP/WebSocket/SSE surface over the filing spine.

pub mod handlers;
pub mod server;
pub mod stream;

pub use server::{routes, AppState};
