// Dashboard service-worker behaviour: push display, notification click
// routing and background-sync dispatch.
//
// The three handlers share no state. Each takes the event's inputs and
// returns what the browser should do.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

pub const DEFAULT_TITLE: &str = "MarketLens";
pub const DEFAULT_BODY: &str = "You have a new market update";
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";
pub const DEFAULT_URL: &str = "/";

/// Background-sync tag that triggers an alert refresh.
pub const SYNC_ALERTS_TAG: &str = "sync-alerts";

/// Action id that closes a notification without opening anything.
pub const DISMISS_ACTION: &str = "dismiss";

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Incoming push payload. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub require_interaction: Option<bool>,
    pub actions: Vec<NotificationAction>,
    pub data: Option<PushData>,
}

#[derive(Debug, Clone, Default)]
pub struct PushData {
    pub url: Option<String>,
}

impl PushPayload {
    /// Read a payload object field by field. A field of the wrong type is
    /// skipped, as is any malformed entry in `actions`.
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let actions = object
            .get("actions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|a| serde_json::from_value(a.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let data = object.get("data").and_then(Value::as_object).map(|d| PushData {
            url: d.get("url").and_then(Value::as_str).map(str::to_string),
        });

        PushPayload {
            title: text("title"),
            body: text("body"),
            icon: text("icon"),
            badge: text("badge"),
            tag: text("tag"),
            require_interaction: object.get("requireInteraction").and_then(Value::as_bool),
            actions,
            data,
        }
    }

    /// A payload carrying only body text.
    fn text(raw: &str) -> Self {
        let text = raw.trim();
        PushPayload {
            body: (!text.is_empty()).then(|| text.to_string()),
            ..PushPayload::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A notification ready to show, all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub url: String,
}

impl Notification {
    /// Build the notification for a push event.
    ///
    /// `payload` is the raw push data, if any. A JSON object is read as a
    /// [`PushPayload`]; a JSON string, or any text that is not JSON, becomes
    /// the body.
    pub fn from_push(payload: Option<&[u8]>) -> Self {
        let parsed = match payload {
            None => PushPayload::default(),
            Some(bytes) => match serde_json::from_slice::<Value>(bytes) {
                Ok(Value::Object(object)) => PushPayload::from_json(&object),
                Ok(Value::String(text)) => PushPayload::text(&text),
                Ok(_) => PushPayload::text(&String::from_utf8_lossy(bytes)),
                Err(e) => {
                    debug!("push payload is not JSON ({e}); using it as body text");
                    PushPayload::text(&String::from_utf8_lossy(bytes))
                }
            },
        };
        Self::from_payload(parsed)
    }

    pub fn from_payload(p: PushPayload) -> Self {
        let url = p
            .data
            .and_then(|d| d.url)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        Notification {
            title: non_empty_or(p.title, DEFAULT_TITLE),
            body: non_empty_or(p.body, DEFAULT_BODY),
            icon: non_empty_or(p.icon, DEFAULT_ICON),
            badge: non_empty_or(p.badge, DEFAULT_BADGE),
            tag: p.tag.filter(|t| !t.is_empty()),
            require_interaction: p.require_interaction.unwrap_or(false),
            actions: p.actions,
            data: NotificationData { url },
        }
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ---------------------------------------------------------------------------
// Notification click
// ---------------------------------------------------------------------------

/// A browser window controlled by the service worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientWindow {
    pub id: String,
    pub url: String,
}

/// What to do after a notification was clicked (it is always closed first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ClickOutcome {
    /// Only close the notification.
    Close,
    /// Focus an already-open window.
    Focus {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    /// Open a new window at `url`.
    Open { url: String },
}

/// Route a notification click. `action` is the clicked action id (empty or
/// `None` for the notification body).
pub fn resolve_click(
    notification: &Notification,
    action: Option<&str>,
    open_windows: &[ClientWindow],
) -> ClickOutcome {
    if action == Some(DISMISS_ACTION) {
        return ClickOutcome::Close;
    }
    let target = &notification.data.url;
    match open_windows.iter().find(|w| same_page(&w.url, target)) {
        Some(window) => ClickOutcome::Focus {
            client_id: window.id.clone(),
        },
        None => ClickOutcome::Open {
            url: target.clone(),
        },
    }
}

/// Compare two URLs by path, ignoring scheme, host, query and fragment.
fn same_page(a: &str, b: &str) -> bool {
    url_path(a) == url_path(b)
}

fn url_path(url: &str) -> &str {
    // A scheme can only appear before the first `/`, `?` or `#`.
    let head = url.find(['/', '?', '#']).unwrap_or(url.len());
    let has_scheme = head > 0 && url[..head].ends_with(':') && url[head..].starts_with("//");
    let without_scheme = if has_scheme {
        let rest = &url[head + 2..];
        rest.find(['/', '?', '#']).map_or("/", |p| &rest[p..])
    } else {
        url
    };
    let end = without_scheme
        .find(['?', '#'])
        .unwrap_or(without_scheme.len());
    let path = without_scheme[..end].trim_end_matches('/');
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

// ---------------------------------------------------------------------------
// Background sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlertsSynced,
    Ignored,
}

/// Dispatch a background-sync event by tag.
pub fn handle_sync(tag: &str) -> SyncOutcome {
    if tag == SYNC_ALERTS_TAG {
        sync_alerts();
        SyncOutcome::AlertsSynced
    } else {
        debug!(tag, "ignoring background sync");
        SyncOutcome::Ignored
    }
}

fn sync_alerts() {
    info!("syncing alerts");
}
