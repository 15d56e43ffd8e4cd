// End-to-end tests for the HTTP API.
//
// Each test builds the full router over an in-memory database, with stub
// upstreams standing in for the quote provider and the AI backends, and
// drives it with `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use marketlens_core::chat::{ChatMessage, ProviderKind, ProviderSelector, Role};
use marketlens_core::config::*;
use marketlens_core::db::Database;
use marketlens_llm::prompt::system_prompt;
use marketlens_llm::{ChatProvider, ChatService, Completion, LlmError};
use marketlens_quotes::{Quote, QuoteError, QuoteSource};
use marketlens_server::app::{self, AppState};

// ===========================================================================
// Test helpers
// ===========================================================================

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        logging: LoggingConfig::default(),
        quotes: QuotesConfig {
            provider_url: "http://quotes.invalid/v7/finance/quote".into(),
            timeout_secs: 5,
        },
        rate_limits: RateLimitsConfig {
            quotes: RateLimitPolicy {
                limit: 30,
                window_secs: 60,
            },
            ai: RateLimitPolicy {
                limit: 20,
                window_secs: 60,
            },
        },
        ai: AiConfig {
            default_provider: ProviderSelector::Auto,
            openai_base_url: "http://openai.invalid/v1".into(),
            openai_model: "gpt-4o-mini".into(),
            ollama_base_url: String::new(),
            ollama_model: "llama3.1".into(),
            max_tokens: 256,
            temperature: 0.2,
            timeout_secs: 5,
            probe_timeout_ms: 100,
        },
        auth: AuthConfig::default(),
        credentials: CredentialsConfig::default(),
        db_path: ":memory:".into(),
    }
}

/// Quote source that prices every requested symbol at 100, or fails.
struct StubQuotes {
    fail: bool,
}

#[async_trait]
impl QuoteSource for StubQuotes {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        if self.fail {
            return Err(QuoteError::Status { status: 502 });
        }
        Ok(symbols
            .iter()
            .map(|s| Quote {
                price: Some(100.0),
                ..Quote::empty(s.clone())
            })
            .collect())
    }
}

/// Chat provider that records every conversation it is sent.
#[derive(Default)]
struct RecordingProvider {
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

#[async_trait]
impl ChatProvider for RecordingProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(Completion {
            content: "AAPL is up 1.2% today.".into(),
            model: "stub-model".into(),
            provider: ProviderKind::OpenAi,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

struct Harness {
    app: Router,
    chat: Arc<RecordingProvider>,
    alice: String,
    bob: String,
}

fn harness_with(fail_quotes: bool) -> Harness {
    harness_from(test_config(), fail_quotes)
}

fn harness_from(config: Config, fail_quotes: bool) -> Harness {
    let db = Database::open(":memory:").unwrap();
    let alice = db.create_session("alice", Duration::days(1)).unwrap().token;
    let bob = db.create_session("bob", Duration::days(1)).unwrap().token;

    let chat = Arc::new(RecordingProvider::default());
    let service = ChatService::new(Some(chat.clone() as Arc<dyn ChatProvider>), None);
    let quotes = Arc::new(StubQuotes { fail: fail_quotes });

    let state = AppState::new(config, db, quotes, service);
    Harness {
        app: app::router(Arc::new(state)),
        chat,
        alice,
        bob,
    }
}

fn harness() -> Harness {
    harness_with(false)
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn quotes_request(symbols: Value) -> Request<Body> {
    request(Method::POST, "/api/quotes", None, Some(json!({ "symbols": symbols })))
}

// ===========================================================================
// Quotes
// ===========================================================================

#[tokio::test]
async fn quotes_rejects_bad_bodies() {
    let h = harness();
    let too_many: Vec<String> = (0..51).map(|i| format!("T{i}")).collect();

    let bad = vec![
        request(Method::POST, "/api/quotes", None, Some(json!({}))),
        quotes_request(json!("AAPL")),
        quotes_request(json!([])),
        quotes_request(json!(too_many)),
        quotes_request(json!(["AAPL", 7])),
        quotes_request(json!(["AAPL", "NOT A TICKER"])),
    ];
    for req in bad {
        let (status, _, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    // invalid JSON with no content type is still our 400 envelope
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/quotes")
        .body(Body::from("symbols=AAPL"))
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid JSON body");
}

#[tokio::test]
async fn quotes_success_carries_rate_limit_headers() {
    let h = harness();
    let (status, headers, body) = send(&h.app, quotes_request(json!(["aapl", " MSFT", "AAPL"]))).await;

    assert_eq!(status, StatusCode::OK);
    let symbols: Vec<&str> = body["quotes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["symbol"].as_str().unwrap())
        .collect();
    assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    assert_eq!(body["quotes"][0]["price"], 100.0);

    assert_eq!(headers["x-ratelimit-limit"], "30");
    assert_eq!(headers["x-ratelimit-remaining"], "29");
    let reset: i64 = headers["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
    assert!(reset > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn quotes_exactly_fifty_symbols_is_allowed() {
    let h = harness();
    let fifty: Vec<String> = (0..50).map(|i| format!("T{i}")).collect();
    let (status, _, body) = send(&h.app, quotes_request(json!(fifty))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quotes"].as_array().unwrap().len(), 50);
}

#[tokio::test]
async fn quotes_31st_request_is_rate_limited() {
    let h = harness();
    let from = |ip: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/api/quotes")
            .header("x-forwarded-for", format!("{ip}, 10.0.0.254"))
            .body(Body::from(r#"{"symbols":["AAPL"]}"#))
            .unwrap()
    };

    for _ in 0..30 {
        let (status, _, _) = send(&h.app, from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, body) = send(&h.app, from("203.0.113.7")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert!(headers.contains_key(header::RETRY_AFTER));

    // another client address has its own window
    let (status, _, _) = send(&h.app, from("198.51.100.2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn quotes_signed_in_users_are_keyed_by_user() {
    let h = harness();
    let req = |token: &str| {
        request(
            Method::POST,
            "/api/quotes",
            Some(token),
            Some(json!({"symbols": ["AAPL"]})),
        )
    };

    let (_, first, _) = send(&h.app, req(h.alice.as_str())).await;
    let (_, second, _) = send(&h.app, req(h.alice.as_str())).await;
    let (_, other, _) = send(&h.app, req(h.bob.as_str())).await;
    assert_eq!(first["x-ratelimit-remaining"], "29");
    assert_eq!(second["x-ratelimit-remaining"], "28");
    assert_eq!(other["x-ratelimit-remaining"], "29");
}

#[tokio::test]
async fn quotes_upstream_failure_is_500() {
    let h = harness_with(true);
    let (status, _, body) = send(&h.app, quotes_request(json!(["AAPL"]))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to fetch quotes" }));
}

// ===========================================================================
// AI chat
// ===========================================================================

#[tokio::test]
async fn chat_requires_session() {
    let h = harness();
    let valid = json!({"messages": [{"role": "user", "content": "hi"}]});

    let cases = vec![
        request(Method::POST, "/api/ai/chat", None, Some(valid.clone())),
        request(Method::POST, "/api/ai/chat", None, Some(json!({}))),
        request(Method::POST, "/api/ai/chat", Some("not-a-real-token"), Some(valid)),
        request(Method::GET, "/api/ai/chat", None, None),
    ];
    for req in cases {
        let (status, _, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
    }
    assert!(h.chat.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_rejects_missing_or_empty_messages() {
    let h = harness();
    for body in [json!({}), json!({"messages": []}), json!({"messages": "hi"})] {
        let (status, _, _) = send(
            &h.app,
            request(Method::POST, "/api/ai/chat", Some(h.alice.as_str()), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn chat_rejects_unknown_provider() {
    let h = harness();
    let body = json!({
        "messages": [{"role": "user", "content": "hi"}],
        "provider": "anthropic"
    });
    let (status, _, body) = send(
        &h.app,
        request(Method::POST, "/api/ai/chat", Some(h.alice.as_str()), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("anthropic"));
}

#[tokio::test]
async fn chat_prepends_system_prompt() {
    let h = harness();
    let body = json!({
        "messages": [
            {"role": "user", "content": "How is AAPL doing?"},
            {"role": "assistant", "content": "Let me check."},
            {"role": "user", "content": "Thanks"}
        ]
    });
    let (status, _, resp) = send(
        &h.app,
        request(Method::POST, "/api/ai/chat", Some(h.alice.as_str()), Some(body)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        resp,
        json!({
            "content": "AAPL is up 1.2% today.",
            "model": "stub-model",
            "provider": "openai"
        })
    );

    let seen = h.chat.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let conversation = &seen[0];
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation[0].role, Role::System);
    assert_eq!(conversation[0].content, system_prompt());
    assert_eq!(conversation[1].content, "How is AAPL doing?");
    assert_eq!(conversation[3].content, "Thanks");
}

#[tokio::test]
async fn chat_unconfigured_provider_is_500() {
    let h = harness();
    let body = json!({
        "messages": [{"role": "user", "content": "hi"}],
        "provider": "ollama"
    });
    let (status, _, body) = send(
        &h.app,
        request(Method::POST, "/api/ai/chat", Some(h.alice.as_str()), Some(body)),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "AI provider not configured");
}

#[tokio::test]
async fn chat_is_rate_limited_per_user_after_validation() {
    let mut config = test_config();
    config.rate_limits.ai.limit = 2;
    let h = harness_from(config, false);
    let valid = json!({"messages": [{"role": "user", "content": "hi"}]});
    let chat = |body: Value| request(Method::POST, "/api/ai/chat", Some(h.alice.as_str()), Some(body));

    let (status, headers, _) = send(&h.app, chat(valid.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-ratelimit-limit"], "2");
    assert_eq!(headers["x-ratelimit-remaining"], "1");

    // A rejected body spends no quota.
    let (status, _, _) = send(&h.app, chat(json!({"messages": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, headers, _) = send(&h.app, chat(valid.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-ratelimit-remaining"], "0");

    let (status, headers, body) = send(&h.app, chat(valid.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(headers["x-ratelimit-limit"], "2");
    assert_eq!(headers["x-ratelimit-remaining"], "0");
    assert!(headers.contains_key("x-ratelimit-reset"));
    let retry_after: i64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(h.chat.seen.lock().unwrap().len(), 2);

    // Another user has their own window.
    let (status, _, _) = send(
        &h.app,
        request(Method::POST, "/api/ai/chat", Some(h.bob.as_str()), Some(valid)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn chat_lists_available_providers() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        request(Method::GET, "/api/ai/chat", Some(h.bob.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "providers": ["openai"] }));
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let h = harness();
    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/ai/chat")
        .header(header::COOKIE, format!("theme=dark; marketlens_session={}", h.alice))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
}

// ===========================================================================
// Watchlists
// ===========================================================================

#[tokio::test]
async fn watchlist_crud() {
    let h = harness();
    let token = Some(h.alice.as_str());

    let (status, _, created) = send(
        &h.app,
        request(
            Method::POST,
            "/api/watchlists",
            token,
            Some(json!({"name": "Tech", "description": "megacaps", "symbols": ["aapl", "msft"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Tech");
    assert_eq!(created["symbols"], json!(["AAPL", "MSFT"]));
    assert!(created["createdAt"].is_string());
    assert!(created.get("userId").is_none());
    let id = created["id"].as_i64().unwrap();
    let uri = format!("/api/watchlists/{id}");

    let (status, _, fetched) = send(&h.app, request(Method::GET, &uri, token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, _, updated) = send(
        &h.app,
        request(
            Method::PUT,
            &uri,
            token,
            Some(json!({"name": "Big Tech", "symbols": ["GOOG"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Big Tech");
    assert!(updated["description"].is_null());
    assert_eq!(updated["symbols"], json!(["GOOG"]));

    let (status, _, listed) = send(&h.app, request(Method::GET, "/api/watchlists", token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["watchlists"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(&h.app, request(Method::DELETE, &uri, token, None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&h.app, request(Method::GET, &uri, token, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn watchlists_are_invisible_across_users() {
    let h = harness();
    let (_, _, created) = send(
        &h.app,
        request(
            Method::POST,
            "/api/watchlists",
            Some(h.alice.as_str()),
            Some(json!({"name": "Private"})),
        ),
    )
    .await;
    let uri = format!("/api/watchlists/{}", created["id"]);

    let bob = Some(h.bob.as_str());
    let (status, _, _) = send(&h.app, request(Method::GET, &uri, bob, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(
        &h.app,
        request(Method::PUT, &uri, bob, Some(json!({"name": "Mine now"}))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&h.app, request(Method::DELETE, &uri, bob, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, listed) = send(&h.app, request(Method::GET, "/api/watchlists", bob, None)).await;
    assert_eq!(listed, json!({ "watchlists": [] }));

    // still intact for the owner
    let (status, _, fetched) = send(&h.app, request(Method::GET, &uri, Some(h.alice.as_str()), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Private");
}

#[tokio::test]
async fn watchlists_require_session_and_valid_input() {
    let h = harness();
    let (status, _, _) = send(&h.app, request(Method::GET, "/api/watchlists", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &h.app,
        request(
            Method::POST,
            "/api/watchlists",
            Some(h.alice.as_str()),
            Some(json!({"name": ""})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Notifications, alerts, health
// ===========================================================================

#[tokio::test]
async fn notification_preview_applies_defaults() {
    let h = harness();
    let (status, _, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/notifications/preview",
            None,
            Some(json!({"title": "TSLA alert", "data": {"url": "/stocks/TSLA"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "TSLA alert");
    assert_eq!(body["body"], "You have a new market update");
    assert_eq!(body["icon"], "/icons/icon-192x192.png");
    assert_eq!(body["badge"], "/icons/badge-72x72.png");
    assert_eq!(body["requireInteraction"], false);
    assert_eq!(body["data"]["url"], "/stocks/TSLA");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/notifications/preview")
        .body(Body::from("Market closes early today"))
        .unwrap();
    let (_, _, body) = send(&h.app, req).await;
    assert_eq!(body["title"], "MarketLens");
    assert_eq!(body["body"], "Market closes early today");
}

#[tokio::test]
async fn notification_click_routes_to_window() {
    let h = harness();
    let click = |body: Value| request(Method::POST, "/api/notifications/click", None, Some(body));
    let windows = json!([
        {"id": "w1", "url": "https://app.example.com/"},
        {"id": "w2", "url": "https://app.example.com/stocks/TSLA?tab=chart"}
    ]);

    let (status, _, body) = send(
        &h.app,
        click(json!({"payload": {"data": {"url": "/stocks/TSLA"}}, "windows": windows})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"outcome": "focus", "clientId": "w2"}));

    let (_, _, body) = send(
        &h.app,
        click(json!({"payload": {"data": {"url": "/stocks/NVDA"}}, "windows": windows})),
    )
    .await;
    assert_eq!(body, json!({"outcome": "open", "url": "/stocks/NVDA"}));

    let (_, _, body) = send(
        &h.app,
        click(json!({"payload": {"data": {"url": "/stocks/TSLA"}}, "action": "dismiss", "windows": windows})),
    )
    .await;
    assert_eq!(body, json!({"outcome": "close"}));

    // No payload targets the dashboard root.
    let (_, _, body) = send(&h.app, click(json!({}))).await;
    assert_eq!(body, json!({"outcome": "open", "url": "/"}));

    let (status, _, _) = send(&h.app, click(json!({"windows": "w1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alert_sync_dispatches_by_tag() {
    let h = harness();
    let (status, _, _) = send(&h.app, request(Method::POST, "/api/alerts/sync", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(
        &h.app,
        request(Method::POST, "/api/alerts/sync", Some(h.alice.as_str()), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"tag": "sync-alerts", "synced": true}));

    let (_, _, body) = send(
        &h.app,
        request(
            Method::POST,
            "/api/alerts/sync",
            Some(h.alice.as_str()),
            Some(json!({"tag": "refresh-news"})),
        ),
    )
    .await;
    assert_eq!(body, json!({"tag": "refresh-news", "synced": false}));
}

#[tokio::test]
async fn health_reports_version() {
    let h = harness();
    let (status, _, body) = send(&h.app, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
