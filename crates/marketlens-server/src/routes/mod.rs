// HTTP routes for the MarketLens API.

mod chat;
mod health;
mod notifications;
mod quotes;
mod watchlists;

use std::sync::Arc;

use axum::body::Bytes;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::error::ApiError;

/// Build the axum router with all routes.
pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/quotes", post(quotes::fetch_quotes))
        .route("/api/ai/chat", get(chat::list_providers).post(chat::chat))
        .route(
            "/api/watchlists",
            get(watchlists::list).post(watchlists::create),
        )
        .route(
            "/api/watchlists/{id}",
            get(watchlists::get_one)
                .put(watchlists::update)
                .delete(watchlists::delete),
        )
        .route("/api/notifications/preview", post(notifications::preview))
        .route("/api/notifications/click", post(notifications::click))
        .route("/api/alerts/sync", post(notifications::sync_alerts))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Body helpers
// ---------------------------------------------------------------------------

// Bodies arrive as raw bytes. Malformed JSON or a missing content type is
// a 400 with the error envelope, never a 415/422.

/// Parse a request body into a JSON object.
pub(crate) fn json_object(body: &Bytes) -> Result<serde_json::Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request("Request body must be a JSON object")),
        Err(_) => Err(ApiError::bad_request("Invalid JSON body")),
    }
}

/// Parse a request body straight into `T`, reporting serde's message as 400.
pub(crate) fn json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))
}

/// Read `field` as an array of strings. `None` when absent or null.
pub(crate) fn string_list(
    map: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Option<Vec<String>>, ApiError> {
    let items = match map.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ApiError::bad_request(format!("`{field}` must be an array"))),
    };
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ApiError::bad_request(format!("`{field}` must contain only strings"))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
