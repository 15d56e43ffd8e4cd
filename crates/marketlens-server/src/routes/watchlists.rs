// Per-user watchlist CRUD under /api/watchlists.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use marketlens_core::watchlist::{
    normalize_watchlist_name, normalize_watchlist_symbols, Watchlist, MAX_WATCHLIST_NAME_LEN,
};

use super::{json_object, string_list};
use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::{internal_error, ApiError};

#[derive(Debug, Serialize)]
pub(crate) struct WatchlistsResponse {
    watchlists: Vec<Watchlist>,
}

/// Validated create/replace body.
#[derive(Debug, PartialEq)]
struct WatchlistInput {
    name: String,
    description: Option<String>,
    symbols: Vec<String>,
}

pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<WatchlistsResponse>, ApiError> {
    let watchlists = state
        .db
        .list_watchlists(&user_id)
        .map_err(|e| internal_error("Failed to load watchlists", e))?;
    Ok(Json(WatchlistsResponse { watchlists }))
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Watchlist>), ApiError> {
    let input = parse_input(&json_object(&body)?)?;
    let watchlist = state
        .db
        .create_watchlist(
            &user_id,
            &input.name,
            input.description.as_deref(),
            &input.symbols,
        )
        .map_err(|e| internal_error("Failed to create watchlist", e))?;
    info!(user = %user_id, id = watchlist.id, "watchlist created");
    Ok((StatusCode::CREATED, Json(watchlist)))
}

pub(crate) async fn get_one(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Watchlist>, ApiError> {
    let id = parse_id(&id)?;
    state
        .db
        .get_watchlist(&user_id, id)
        .map_err(|e| internal_error("Failed to load watchlist", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Watchlist>, ApiError> {
    let id = parse_id(&id)?;
    let input = parse_input(&json_object(&body)?)?;
    state
        .db
        .update_watchlist(
            &user_id,
            id,
            &input.name,
            input.description.as_deref(),
            &input.symbols,
        )
        .map_err(|e| internal_error("Failed to update watchlist", e))?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let deleted = state
        .db
        .delete_watchlist(&user_id, id)
        .map_err(|e| internal_error("Failed to delete watchlist", e))?;
    if deleted {
        info!(user = %user_id, id, "watchlist deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Ids that do not parse cannot name a watchlist.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

fn parse_input(body: &Map<String, Value>) -> Result<WatchlistInput, ApiError> {
    let name = match body.get("name") {
        Some(Value::String(s)) => normalize_watchlist_name(s).ok_or_else(|| {
            ApiError::bad_request(format!(
                "`name` must be 1-{MAX_WATCHLIST_NAME_LEN} characters"
            ))
        })?,
        Some(_) => return Err(ApiError::bad_request("`name` must be a string")),
        None => return Err(ApiError::bad_request("`name` is required")),
    };

    let description = match body.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|d| !d.is_empty()),
        Some(_) => return Err(ApiError::bad_request("`description` must be a string")),
    };

    let raw_symbols = string_list(body, "symbols")?.unwrap_or_default();
    let symbols = normalize_watchlist_symbols(&raw_symbols)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(WatchlistInput {
        name,
        description,
        symbols,
    })
}
