//! Feed capture for the filing spine: adapters over the SEC publication
//! channels, the rate-limited HTTP client every outbound call routes
//! through, the collector loop that admits candidates and commits
//! checkpoints, the filing fetcher with its content-addressable document
//! store, and the periodic symbology refresh.

pub mod client;
pub mod collector;
pub mod feeds;
pub mod fetcher;
pub mod rate_limiter;
pub mod search;
pub mod storage;
pub mod submissions;
pub mod symbology;
pub mod utils;

pub use client::SecClient;
pub use collector::{FeedCollector, FeedFrame};
pub use feeds::{DailyIndexAdapter, FeedAdapter, FeedBatch, FullIndexAdapter, RssFeedAdapter};
pub use fetcher::{FilingBundle, FilingFetcher};
pub use rate_limiter::SecRateLimiter;
pub use search::{DiscoveredFiling, FullTextSearch, SearchQuery};
pub use storage::DocumentStore;
pub use symbology::SymbologyRefresher;
