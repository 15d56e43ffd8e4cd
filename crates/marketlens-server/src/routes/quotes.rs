// POST /api/quotes

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use tracing::debug;

use marketlens_core::watchlist::normalize_symbols;
use marketlens_quotes::Quote;

use super::{json_object, string_list};
use crate::app::AppState;
use crate::auth::Identity;
use crate::error::{internal_error, rate_limit_headers, ApiError};

#[derive(Debug, Serialize)]
pub(crate) struct QuotesResponse {
    quotes: Vec<Quote>,
}

pub(crate) async fn fetch_quotes(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    body: Bytes,
) -> Result<(HeaderMap, Json<QuotesResponse>), ApiError> {
    let body = json_object(&body)?;
    let raw = string_list(&body, "symbols")?
        .ok_or_else(|| ApiError::bad_request("`symbols` is required"))?;
    let symbols = normalize_symbols(&raw).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let decision = state.limiters.quotes.check(&identity.rate_limit_key());
    if !decision.allowed {
        return Err(ApiError::RateLimited(decision));
    }

    let quotes = state
        .quotes
        .fetch_quotes(&symbols)
        .await
        .map_err(|e| internal_error("Failed to fetch quotes", e))?;
    debug!(requested = symbols.len(), returned = quotes.len(), "quotes served");

    Ok((rate_limit_headers(&decision), Json(QuotesResponse { quotes })))
}
