// Uniform JSON error envelope for the API routes.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use marketlens_quotes::Decision;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Too many requests")]
    RateLimited(Decision),

    /// The message is what the client sees; log the cause before building
    /// this.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut headers = HeaderMap::new();
        if let ApiError::RateLimited(decision) = &self {
            headers = rate_limit_headers(decision);
            headers.insert(
                RETRY_AFTER,
                HeaderValue::from(decision.retry_after_secs(Utc::now())),
            );
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, headers, body).into_response()
    }
}

/// `X-RateLimit-*` headers describing `decision`.
pub fn rate_limit_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_unix()));
    headers
}

/// Log an internal failure and return the generic client-facing error.
pub fn internal_error(public_message: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!("{public_message}: {err:#}");
    ApiError::internal(public_message)
}
