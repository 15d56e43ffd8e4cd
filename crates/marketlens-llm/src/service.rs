// Provider selection for chat requests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{info, warn};

use marketlens_core::chat::{ChatMessage, ProviderKind, ProviderSelector};
use marketlens_core::config::Config;

use crate::client::{ChatProvider, Completion, GenerationOptions, LlmError, OllamaClient, OpenAiClient};

/// Routes chat requests to the configured providers.
///
/// `Auto` prefers OpenAI and falls back to Ollama when OpenAI is not
/// configured or its call fails.
pub struct ChatService {
    openai: Option<Arc<dyn ChatProvider>>,
    ollama: Option<Arc<dyn ChatProvider>>,
}

impl ChatService {
    pub fn new(
        openai: Option<Arc<dyn ChatProvider>>,
        ollama: Option<Arc<dyn ChatProvider>>,
    ) -> Self {
        Self { openai, ollama }
    }

    /// Build the service from config. OpenAI is enabled when an API key is
    /// present, Ollama when its base URL is non-empty.
    pub fn from_config(config: &Config) -> Self {
        let options = GenerationOptions::from_config(config);
        let ai = &config.ai;

        let openai = config.credentials.openai_key().map(|key| {
            Arc::new(OpenAiClient::new(
                key.to_string(),
                ai.openai_base_url.clone(),
                ai.openai_model.clone(),
                options,
            )) as Arc<dyn ChatProvider>
        });

        let ollama = (!ai.ollama_base_url.trim().is_empty()).then(|| {
            Arc::new(OllamaClient::new(
                ai.ollama_base_url.clone(),
                ai.ollama_model.clone(),
                options,
                Duration::from_millis(ai.probe_timeout_ms),
            )) as Arc<dyn ChatProvider>
        });

        Self::new(openai, ollama)
    }

    /// Providers that are configured, whether or not they are reachable.
    pub fn configured(&self) -> Vec<ProviderKind> {
        [&self.openai, &self.ollama]
            .into_iter()
            .flatten()
            .map(|p| p.kind())
            .collect()
    }

    /// Complete `messages` (system prompt included) with the selected
    /// provider.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        selector: ProviderSelector,
    ) -> Result<Completion, LlmError> {
        match selector {
            ProviderSelector::OpenAi => {
                let provider = self
                    .openai
                    .as_ref()
                    .ok_or(LlmError::NotConfigured(ProviderKind::OpenAi))?;
                provider.complete(messages).await
            }
            ProviderSelector::Ollama => {
                let provider = self
                    .ollama
                    .as_ref()
                    .ok_or(LlmError::NotConfigured(ProviderKind::Ollama))?;
                provider.complete(messages).await
            }
            ProviderSelector::Auto => self.complete_auto(messages).await,
        }
    }

    async fn complete_auto(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        match (&self.openai, &self.ollama) {
            (Some(openai), Some(ollama)) => match openai.complete(messages).await {
                Ok(completion) => Ok(completion),
                Err(e) => {
                    warn!("OpenAI failed, falling back to Ollama: {e}");
                    ollama.complete(messages).await
                }
            },
            (Some(openai), None) => openai.complete(messages).await,
            (None, Some(ollama)) => ollama.complete(messages).await,
            (None, None) => Err(LlmError::NoProviderAvailable),
        }
    }

    /// Providers that can serve requests right now. Probes run concurrently.
    pub async fn available_providers(&self) -> Vec<ProviderKind> {
        let providers: Vec<&Arc<dyn ChatProvider>> =
            [&self.openai, &self.ollama].into_iter().flatten().collect();

        let checks = join_all(providers.iter().map(|p| p.is_available())).await;
        let available: Vec<ProviderKind> = providers
            .iter()
            .zip(checks)
            .filter_map(|(p, ok)| ok.then(|| p.kind()))
            .collect();

        info!(?available, "provider availability checked");
        available
    }
}
