// Push preview, notification click routing and the background-sync target.

use axum::body::Bytes;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use marketlens_core::notify::{
    handle_sync, resolve_click, ClickOutcome, ClientWindow, Notification, PushPayload,
    SyncOutcome, SYNC_ALERTS_TAG,
};

use super::json_body;
use crate::auth::AuthUser;
use crate::error::ApiError;

/// Render a push payload the way the service worker would display it. The
/// raw body is the push data; an empty body means no payload.
pub(crate) async fn preview(body: Bytes) -> Json<Notification> {
    let payload = (!body.is_empty()).then_some(body.as_ref());
    Json(Notification::from_push(payload))
}

#[derive(Debug, Deserialize)]
struct ClickRequest {
    /// Push payload the clicked notification was built from.
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    windows: Vec<ClientWindow>,
}

/// Decide what a click on a notification does: close it, focus an open
/// window already showing its page, or open a new one.
pub(crate) async fn click(body: Bytes) -> Result<Json<ClickOutcome>, ApiError> {
    let req = json_body::<ClickRequest>(&body)?;
    let notification = match &req.payload {
        Some(object) => Notification::from_payload(PushPayload::from_json(object)),
        None => Notification::from_push(None),
    };
    let outcome = resolve_click(&notification, req.action.as_deref(), &req.windows);
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    #[serde(default = "default_tag")]
    tag: String,
}

fn default_tag() -> String {
    SYNC_ALERTS_TAG.to_string()
}

#[derive(Debug, Serialize)]
pub(crate) struct SyncResponse {
    tag: String,
    synced: bool,
}

pub(crate) async fn sync_alerts(
    AuthUser(_): AuthUser,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    let tag = if body.is_empty() {
        default_tag()
    } else {
        json_body::<SyncRequest>(&body)?.tag
    };
    let synced = handle_sync(&tag) == SyncOutcome::AlertsSynced;
    Ok(Json(SyncResponse { tag, synced }))
}
