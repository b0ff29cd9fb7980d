use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use filing_spine_core::config::SecConfig;
use filing_spine_core::{AppError, AppResult};

use crate::rate_limiter::SecRateLimiter;

/// HTTP client for SEC endpoints with rate limiting and retry logic.
///
/// Every outbound call acquires a token from the shared bucket first.
/// 429 and 5xx responses are retried with jittered exponential backoff up
/// to the configured attempt limit; other 4xx are terminal. A Retry-After
/// header, when present, overrides the computed backoff.
#[derive(Debug, Clone)]
pub struct SecClient {
    client: reqwest::Client,
    rate_limiter: SecRateLimiter,
    max_attempts: u32,
    backoff_base_ms: u64,
}

impl SecClient {
    pub fn new(config: &SecConfig, rate_limiter: SecRateLimiter) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| AppError::ConfigError(format!("Invalid user agent: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rate_limiter,
            max_attempts: config.max_attempts.max(1),
            backoff_base_ms: config.backoff_base_ms,
        })
    }

    /// Exponential backoff with +/-20% jitter to avoid thundering herds
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base_ms.saturating_mul(2_u64.pow(attempt));
        let jitter = (base as f64 * 0.2 * (rand::thread_rng().gen::<f64>() - 0.5)) as i64;
        Duration::from_millis((base as i64 + jitter).max(0) as u64)
    }

    /// Fetch text content with rate limiting and retries
    pub async fn get_text(&self, url: &str) -> AppResult<String> {
        let response = self.get_with_retries(url).await?;
        response.text().await.map_err(AppError::HttpClient)
    }

    /// Fetch binary content with rate limiting and retries
    pub async fn get_bytes(&self, url: &str) -> AppResult<Vec<u8>> {
        let response = self.get_with_retries(url).await?;
        let bytes = response.bytes().await.map_err(AppError::HttpClient)?;
        Ok(bytes.to_vec())
    }

    /// Fetch and deserialize a JSON document
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| {
            AppError::ExternalApiError(format!(
                "unexpected response shape from {}: {} (body starts {:?})",
                url,
                e,
                body.chars().take(120).collect::<String>()
            ))
        })
    }

    async fn get_with_retries(&self, url: &str) -> AppResult<reqwest::Response> {
        let mut attempt = 0;

        loop {
            self.rate_limiter.acquire().await;

            let result = self.client.get(url).send().await;

            match result {
                Ok(response) => match response.status() {
                    status if status.is_success() => return Ok(response),
                    StatusCode::NOT_FOUND => {
                        return Err(AppError::not_found(format!("resource at {}", url)));
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        attempt += 1;
                        if attempt >= self.max_attempts {
                            return Err(AppError::RateLimitExceeded);
                        }
                        // Honor Retry-After; no token is consumed while waiting
                        let wait = response
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.backoff(attempt - 1));
                        warn!(
                            url,
                            attempt,
                            max_attempts = self.max_attempts,
                            ?wait,
                            "rate limited by SEC (429), backing off"
                        );
                        sleep(wait).await;
                    }
                    status if status.is_server_error() => {
                        attempt += 1;
                        if attempt >= self.max_attempts {
                            return Err(AppError::ExternalApiError(format!(
                                "{} from {} after {} attempts",
                                status, url, attempt
                            )));
                        }
                        let wait = self.backoff(attempt - 1);
                        warn!(url, %status, attempt, ?wait, "server error, retrying");
                        sleep(wait).await;
                    }
                    status => {
                        // Remaining 4xx are terminal; the task is quarantined
                        // by the caller rather than retried.
                        return Err(AppError::ExternalApiError(format!(
                            "terminal status {} from {}",
                            status, url
                        )));
                    }
                },
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(AppError::HttpClient(e));
                    }
                    let wait = self.backoff(attempt - 1);
                    warn!(url, error = %e, attempt, ?wait, "request failed, retrying");
                    sleep(wait).await;
                }
            }
        }
    }
}
