// Session gate: resolves a request to a user identity.
//
// A session token is read from `Authorization: Bearer <token>` or, failing
// that, from the session cookie. Unknown or expired tokens resolve to an
// anonymous identity; routes that need a user take `AuthUser`, which turns
// anonymity into a 401.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;

use crate::app::AppState;
use crate::error::{internal_error, ApiError};

/// Who is calling: a signed-in user, or an anonymous client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    /// Client address used as the fallback rate-limit key.
    pub client: Option<String>,
}

impl Identity {
    /// Key for rate limiting: the user when signed in, else the client
    /// address, else a shared anonymous bucket.
    pub fn rate_limit_key(&self) -> String {
        match (&self.user_id, &self.client) {
            (Some(user), _) => format!("user:{user}"),
            (None, Some(addr)) => format!("ip:{addr}"),
            (None, None) => "anonymous".to_string(),
        }
    }
}

impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let client = client_address(parts);
        let user_id = match session_token(&parts.headers, &state.config.auth.cookie_name) {
            Some(token) => state
                .db
                .session_user(&token, Utc::now())
                .map_err(|e| internal_error("Failed to verify session", e))?,
            None => None,
        };
        Ok(Identity { user_id, client })
    }
}

/// A signed-in user. Extraction fails with 401 for anonymous callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        identity.user_id.map(AuthUser).ok_or(ApiError::Unauthorized)
    }
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Session token from the bearer header, or the named cookie.
pub(crate) fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// First `X-Forwarded-For` hop, else the socket peer address.
fn client_address(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
