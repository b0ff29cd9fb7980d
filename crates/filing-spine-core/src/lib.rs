//! Core data model for the filing-spine pipeline: bronze records with
//! sighting history, silver filings and sections, gold mentions and the
//! entity spine (entities, identifier claims, relationships), plus the
//! task queue the workers consume.

pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod schema;
pub mod test_utils;

pub use config::Config;
pub use database::{create_pool, DatabasePool};
pub use error::{handle_rejection, AppError, AppResult};
