use serde_json::json;
use thiserror::Error;
use warp::{http::StatusCode, reject::Reject, Reply};

/// Application-specific error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Database pool error: {0}")]
    DatabasePool(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation errors: {0}")]
    ValidationErrors(#[from] validator::ValidationErrors),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Invalid date format: {0}")]
    InvalidDateFormat(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Feed error: {0}")]
    FeedError(String),

    #[error("Parser error: {0}")]
    ParserError(String),

    #[error("Resolver error: {0}")]
    ResolverError(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Queue saturated: {0}")]
    QueueSaturated(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl Reject for AppError {}

/// Convert AppError to HTTP response
pub async fn handle_rejection(err: warp::Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, code, message) = if err.is_not_found() {
        tracing::warn!("404 Not Found: {:?}", err);
        (StatusCode::NOT_FOUND, "not_found", "Not Found".to_string())
    } else if let Some(app_error) = err.find::<AppError>() {
        match app_error {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database error".to_string(),
                )
            }
            AppError::DatabasePool(msg) => {
                tracing::error!("Database pool error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "Database connection error".to_string(),
                )
            }
            AppError::HttpClient(e) => {
                tracing::error!("HTTP client error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "External service error".to_string(),
                )
            }
            AppError::JsonSerialization(e) => {
                tracing::warn!("JSON serialization error: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_json",
                    "Invalid JSON".to_string(),
                )
            }
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }
            AppError::ValidationErrors(e) => {
                tracing::warn!("Validation errors: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    "Validation failed".to_string(),
                )
            }
            AppError::InvalidDateFormat(msg) => {
                tracing::warn!("Invalid date format: {}", msg);
                (StatusCode::BAD_REQUEST, "invalid_date", msg.clone())
            }
            AppError::NotFound(msg) => {
                tracing::info!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "not_found", msg.clone())
            }
            AppError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, "conflict", msg.clone())
            }
            AppError::UnprocessableEntity(msg) => {
                tracing::warn!("Unprocessable entity: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "unprocessable",
                    msg.clone(),
                )
            }
            AppError::RangeNotSatisfiable(msg) => {
                tracing::warn!("Range not satisfiable: {}", msg);
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "range_not_satisfiable",
                    msg.clone(),
                )
            }
            AppError::RateLimitExceeded => {
                tracing::warn!("Rate limit exceeded");
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "Rate limit exceeded".to_string(),
                )
            }
            AppError::ExternalApiError(msg) | AppError::FeedError(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "External API error".to_string(),
                )
            }
            AppError::ParserError(msg) => {
                tracing::error!("Parser error: {}", msg);
                (StatusCode::BAD_REQUEST, "parser_error", msg.clone())
            }
            AppError::ResolverError(msg) => {
                tracing::error!("Resolver error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "resolver_error",
                    msg.clone(),
                )
            }
            AppError::IntegrityViolation(msg) => {
                tracing::error!("Integrity violation: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "integrity_violation",
                    msg.clone(),
                )
            }
            AppError::DeadlineExceeded(msg) => {
                tracing::warn!("Deadline exceeded: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "deadline_exceeded",
                    msg.clone(),
                )
            }
            AppError::QueueSaturated(msg) | AppError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    msg.clone(),
                )
            }
            AppError::ConfigError(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_error",
                    "Configuration error".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    "I/O error".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        }
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        tracing::warn!("Invalid request body: {:?}", err);
        (
            StatusCode::BAD_REQUEST,
            "bad_request",
            "Invalid request body".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        tracing::warn!("Method not allowed: {:?}", err);
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "Method not allowed".to_string(),
        )
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error".to_string(),
        )
    };

    let body = warp::reply::json(&json!({
        "code": code,
        "error": message,
    }));

    Ok(warp::reply::with_status(body, status))
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Convert from bb8 pool error
impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for AppError {
    fn from(err: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        AppError::DatabasePool(err.to_string())
    }
}

/// Convert from diesel migration error
impl From<diesel_migrations::MigrationError> for AppError {
    fn from(err: diesel_migrations::MigrationError) -> Self {
        AppError::InternalError(format!("Migration error: {}", err))
    }
}

/// Convert from chrono parse error
impl From<chrono::ParseError> for AppError {
    fn from(err: chrono::ParseError) -> Self {
        AppError::InvalidDateFormat(err.to_string())
    }
}

/// Convert from uuid parse error
impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(format!("Invalid UUID: {}", err))
    }
}

/// Convert from config error
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl AppError {
    pub fn not_found<T: std::fmt::Display>(resource: T) -> Self {
        AppError::NotFound(format!("{} not found", resource))
    }

    pub fn bad_request<T: std::fmt::Display>(message: T) -> Self {
        AppError::BadRequest(message.to_string())
    }

    pub fn internal_error<T: std::fmt::Display>(message: T) -> Self {
        AppError::InternalError(message.to_string())
    }

    /// Whether a retry of the failing operation can reasonably succeed.
    /// Drives the queue's retry-vs-dead-letter decision.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::HttpClient(_)
                | AppError::DatabasePool(_)
                | AppError::RateLimitExceeded
                | AppError::ExternalApiError(_)
                | AppError::FeedError(_)
                | AppError::DeadlineExceeded(_)
                | AppError::QueueSaturated(_)
                | AppError::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        // REQUIREMENT: Transient failures are retried, terminal ones dead-lettered
        // PURPOSE: Verify the retry classifier separates the two families
        assert!(AppError::RateLimitExceeded.is_transient());
        assert!(AppError::FeedError("socket reset".to_string()).is_transient());
        assert!(AppError::DeadlineExceeded("task 42".to_string()).is_transient());

        assert!(!AppError::ParserError("bad offsets".to_string()).is_transient());
        assert!(!AppError::NotFound("filing".to_string()).is_transient());
        assert!(!AppError::IntegrityViolation("span mismatch".to_string()).is_transient());
    }
}
