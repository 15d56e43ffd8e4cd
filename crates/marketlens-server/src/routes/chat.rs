// POST /api/ai/chat and GET /api/ai/chat

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use marketlens_core::chat::{ChatMessage, ProviderKind, ProviderSelector};
use marketlens_llm::prompt::with_system_prompt;
use marketlens_llm::{Completion, LlmError};

use super::json_object;
use crate::app::AppState;
use crate::auth::AuthUser;
use crate::error::{internal_error, rate_limit_headers, ApiError};

#[derive(Debug, Serialize)]
pub(crate) struct ProvidersResponse {
    providers: Vec<ProviderKind>,
}

pub(crate) async fn chat(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    body: Bytes,
) -> Result<(HeaderMap, Json<Completion>), ApiError> {
    let body = json_object(&body)?;
    let messages = parse_messages(body.get("messages"))?;
    let selector = parse_provider(body.get("provider"), state.config.ai.default_provider)?;

    let decision = state.limiters.ai.check(&format!("user:{user_id}"));
    if !decision.allowed {
        return Err(ApiError::RateLimited(decision));
    }

    let conversation = with_system_prompt(&messages);
    let completion = state
        .chat
        .complete(&conversation, selector)
        .await
        .map_err(|e| {
            let public = match e {
                LlmError::NotConfigured(_) | LlmError::NoProviderAvailable => {
                    "AI provider not configured"
                }
                _ => "Failed to get AI response",
            };
            internal_error(public, e)
        })?;
    info!(
        user = %user_id,
        provider = %completion.provider,
        model = %completion.model,
        "chat completion served"
    );

    Ok((rate_limit_headers(&decision), Json(completion)))
}

pub(crate) async fn list_providers(
    State(state): State<Arc<AppState>>,
    AuthUser(_): AuthUser,
) -> Json<ProvidersResponse> {
    let providers = state.chat.available_providers().await;
    Json(ProvidersResponse { providers })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn parse_messages(value: Option<&Value>) -> Result<Vec<ChatMessage>, ApiError> {
    let items = match value {
        None | Some(Value::Null) => return Err(ApiError::bad_request("`messages` is required")),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ApiError::bad_request("`messages` must be an array")),
    };
    if items.is_empty() {
        return Err(ApiError::bad_request("`messages` must not be empty"));
    }
    items
        .iter()
        .map(|item| {
            serde_json::from_value::<ChatMessage>(item.clone())
                .map_err(|e| ApiError::bad_request(format!("invalid message: {e}")))
        })
        .collect()
}

fn parse_provider(
    value: Option<&Value>,
    default: ProviderSelector,
) -> Result<ProviderSelector, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(s)) => s.parse().map_err(ApiError::BadRequest),
        Some(_) => Err(ApiError::bad_request("`provider` must be a string")),
    }
}
