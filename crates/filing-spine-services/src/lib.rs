//! Orchestration services: the Postgres-backed work queues, the pipeline
//! workers that move filings through parse -> mentions -> resolve -> graph,
//! and sync job tracking.

pub mod pipeline;
pub mod queue;
pub mod sync;

pub use pipeline::{run_worker, PipelineDeps};
pub use queue::QueueStatistics;
pub use sync::{SyncProgress, SyncService};
