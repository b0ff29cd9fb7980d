use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub server: ServerConfig,
    pub sec: SecConfig,
    pub storage: StorageConfig,
    pub resolver: ResolverConfig,
    pub parser: ParserConfig,
    pub worker: WorkerConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Outbound SEC access. The user agent is mandatory: SEC fair-access rules
/// require every automated client to identify its operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecConfig {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub requests_per_second: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

/// Backend URIs per refinement layer. All default to the primary database;
/// splitting layers across stores only requires overriding these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bronze: String,
    pub silver: String,
    pub graph: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub fuzzy_threshold: f64,
    pub fuzzy_margin: f64,
    /// Exchanges in decreasing priority; breaks ticker-collision ties.
    pub exchange_priority: Vec<String>,
    /// Identifier sources in decreasing precedence.
    pub source_precedence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub version: String,
    pub max_section_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_attempts: i32,
    pub backoff_base_seconds: u64,
    pub deadline_seconds: u64,
    pub poll_interval_seconds: u64,
    pub queue_high_water: i64,
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider_url: Option<String>,
    pub model: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let user_agent = env::var("SEC_USER_AGENT").map_err(|_| {
            AppError::ConfigError(
                "SEC_USER_AGENT is required (format: \"app/version (contact@example.com)\")"
                    .to_string(),
            )
        })?;

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost:5432/filing_spine".to_string());

        Ok(Config {
            database_url: database_url.clone(),

            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8750".to_string())
                    .parse()
                    .unwrap_or(8750),
            },

            sec: SecConfig {
                data_dir: env::var("DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data")),
                user_agent,
                requests_per_second: parse_env("SEC_REQUESTS_PER_SECOND", 10),
                max_attempts: parse_env("SEC_MAX_ATTEMPTS", 5),
                backoff_base_ms: parse_env("SEC_BACKOFF_BASE_MS", 1000),
            },

            storage: StorageConfig {
                bronze: env::var("STORAGE_BRONZE").unwrap_or_else(|_| database_url.clone()),
                silver: env::var("STORAGE_SILVER").unwrap_or_else(|_| database_url.clone()),
                graph: env::var("STORAGE_GRAPH").unwrap_or_else(|_| database_url),
            },

            resolver: ResolverConfig {
                fuzzy_threshold: parse_env("RESOLVER_FUZZY_THRESHOLD", 0.92),
                fuzzy_margin: parse_env("RESOLVER_FUZZY_MARGIN", 0.03),
                exchange_priority: parse_list(
                    "RESOLVER_EXCHANGE_PRIORITY",
                    &["NYSE", "Nasdaq", "NYSE American", "CBOE", "OTC"],
                ),
                source_precedence: parse_list(
                    "RESOLVER_SOURCE_PRECEDENCE",
                    &["sec_submissions", "sec_tickers"],
                ),
            },

            parser: ParserConfig {
                version: env::var("PARSER_VERSION").unwrap_or_else(|_| "v1".to_string()),
                max_section_bytes: parse_env("PARSER_MAX_SECTION_BYTES", 2_000_000),
            },

            worker: WorkerConfig {
                max_attempts: parse_env("WORKER_MAX_ATTEMPTS", 5),
                backoff_base_seconds: parse_env("WORKER_BACKOFF_BASE_SECONDS", 2),
                deadline_seconds: parse_env("WORKER_DEADLINE_SECONDS", 300),
                poll_interval_seconds: parse_env("WORKER_POLL_INTERVAL_SECONDS", 5),
                queue_high_water: parse_env("WORKER_QUEUE_HIGH_WATER", 10_000),
                max_concurrent_jobs: parse_env("WORKER_MAX_CONCURRENT_JOBS", 4),
            },

            llm: LlmConfig {
                enabled: parse_env("LLM_ENABLED", false),
                provider_url: env::var("LLM_PROVIDER_URL").ok(),
                model: env::var("LLM_MODEL").ok(),
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| default.iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_user_agent_is_required() {
        // REQUIREMENT: Every SEC call carries an operator-identifying user agent
        // PURPOSE: Verify the process refuses to configure itself without one
        let prior = env::var("SEC_USER_AGENT").ok();
        env::remove_var("SEC_USER_AGENT");

        let result = Config::from_env();
        assert!(matches!(result, Err(AppError::ConfigError(_))));

        if let Some(v) = prior {
            env::set_var("SEC_USER_AGENT", v);
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_defaults() {
        env::set_var("SEC_USER_AGENT", "filing-spine-test/0.1 (test@example.com)");

        let config = Config::from_env().unwrap();
        assert_eq!(config.sec.requests_per_second, 10);
        assert_eq!(config.resolver.exchange_priority[0], "NYSE");
        assert!(config.resolver.fuzzy_threshold > config.resolver.fuzzy_margin);
        assert!(!config.llm.enabled);
    }
}
