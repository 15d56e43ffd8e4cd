// HTTP clients for the chat providers.
//
// `OpenAiClient` talks to the Chat Completions API, `OllamaClient` to a local
// Ollama daemon's `/api/chat`. Both answer with a single non-streamed
// completion and implement `ChatProvider` so the service can pick between
// them.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use marketlens_core::chat::{ChatMessage, ProviderKind};
use marketlens_core::config::Config;

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider {0} is not configured")]
    NotConfigured(ProviderKind),

    #[error("no AI provider is configured")]
    NoProviderAvailable,

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: ProviderKind,
        source: reqwest::Error,
    },

    #[error("{provider} returned status {status}: {message}")]
    Status {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unexpected response: {message}")]
    InvalidResponse {
        provider: ProviderKind,
        message: String,
    },
}

/// One finished completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
}

/// Sampling settings shared by both providers.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GenerationOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens: config.ai.max_tokens,
            temperature: config.ai.temperature,
            timeout: Duration::from_secs(config.ai.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Produce one completion for `messages` (already including the system
    /// prompt).
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError>;

    /// Whether the provider can currently serve requests.
    async fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    options: GenerationOptions,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, model: String, options: GenerationOptions) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            options,
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.options.max_tokens,
            "temperature": self.options.temperature,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, messages = messages.len(), "sending OpenAI chat request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.options.timeout)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                provider: ProviderKind::OpenAi,
                source,
            })?;

        let body = read_json(ProviderKind::OpenAi, response).await?;
        let (content, model) =
            parse_openai_completion(&body).ok_or_else(|| LlmError::InvalidResponse {
                provider: ProviderKind::OpenAi,
                message: "missing choices[0].message.content".to_string(),
            })?;

        Ok(Completion {
            content,
            model: model.unwrap_or_else(|| self.model.clone()),
            provider: ProviderKind::OpenAi,
        })
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    options: GenerationOptions,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub fn new(
        base_url: String,
        model: String,
        options: GenerationOptions,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            options,
            probe_timeout,
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.options.temperature,
                "num_predict": self.options.max_tokens,
            },
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(%url, messages = messages.len(), "sending Ollama chat request");

        let response = self
            .http
            .post(&url)
            .timeout(self.options.timeout)
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                provider: ProviderKind::Ollama,
                source,
            })?;

        let body = read_json(ProviderKind::Ollama, response).await?;
        let (content, model) =
            parse_ollama_completion(&body).ok_or_else(|| LlmError::InvalidResponse {
                provider: ProviderKind::Ollama,
                message: "missing message.content".to_string(),
            })?;

        Ok(Completion {
            content,
            model: model.unwrap_or_else(|| self.model.clone()),
            provider: ProviderKind::Ollama,
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama availability check at {url} failed: {e}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing helpers
// ---------------------------------------------------------------------------

/// Read a JSON body, turning non-2xx statuses into `LlmError::Status`.
async fn read_json(provider: ProviderKind, response: reqwest::Response) -> Result<Value, LlmError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| LlmError::Transport { provider, source })?;

    if !status.is_success() {
        let message = extract_error_message(&text);
        warn!(%provider, status = status.as_u16(), %message, "provider returned error status");
        return Err(LlmError::Status {
            provider,
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
        provider,
        message: format!("body is not JSON: {e}"),
    })
}

/// Extract `(content, model)` from a Chat Completions response.
///
/// Expected shape: `{ "model": "...", "choices": [{ "message": { "content": "..." } }] }`
pub(crate) fn parse_openai_completion(v: &Value) -> Option<(String, Option<String>)> {
    let content = v
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?
        .to_string();
    let model = v.get("model").and_then(Value::as_str).map(str::to_string);
    Some((content, model))
}

/// Extract `(content, model)` from an Ollama `/api/chat` response.
///
/// Expected shape: `{ "model": "...", "message": { "role": "assistant", "content": "..." }, "done": true }`
pub(crate) fn parse_ollama_completion(v: &Value) -> Option<(String, Option<String>)> {
    let content = v.get("message")?.get("content")?.as_str()?.to_string();
    let model = v.get("model").and_then(Value::as_str).map(str::to_string);
    Some((content, model))
}

/// Pull a readable message out of an error body. OpenAI nests it under
/// `error.message`, Ollama uses a bare `error` string.
pub(crate) fn extract_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        let err = v.get("error")?;
        err.get("message")
            .and_then(Value::as_str)
            .or_else(|| err.as_str())
            .map(str::to_string)
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "empty response body".to_string()
        } else {
            trimmed.chars().take(200).collect()
        }
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
