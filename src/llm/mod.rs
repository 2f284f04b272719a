use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

pub mod anthropic;
pub mod fallback;
pub mod gemini;
pub mod ollama;
pub mod openai;

use crate::config::AiConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("proveedor {provider}: {message}")]
    Provider { provider: String, message: String },
    #[error("error de red hacia {provider}: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("respuesta malformada de {provider}: {message}")]
    MalformedResponse { provider: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub provider: String,
}

/// Provider-agnostic chat capability. `FallbackProvider` composes two of
/// these and is itself one.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    fn name(&self) -> &str;
}

/// Builds a single provider from config. Unknown provider names map to the
/// OpenAI-compatible adapter, which covers most self-hosted gateways.
pub fn provider_from_config(cfg: &AiConfig) -> Arc<dyn ChatProvider> {
    match cfg.provider.to_lowercase().as_str() {
        "ollama" => Arc::new(ollama::OllamaProvider::new(
            cfg.base_url.clone(),
            cfg.model.clone(),
        )),
        "anthropic" => Arc::new(anthropic::AnthropicProvider::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
        )),
        "gemini" | "google" => Arc::new(gemini::GeminiProvider::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
        )),
        "openai" => Arc::new(openai::OpenAiProvider::new(
            cfg.api_key.clone(),
            cfg.model.clone(),
            cfg.base_url.clone(),
        )),
        other => {
            warn!("proveedor de IA desconocido '{other}', usando adaptador OpenAI-compatible");
            Arc::new(openai::OpenAiProvider::new(
                cfg.api_key.clone(),
                cfg.model.clone(),
                cfg.base_url.clone(),
            ))
        }
    }
}

/// Selects primary + optional fallback once at startup; no per-request
/// routing.
pub fn provider_from_env(
    primary: &AiConfig,
    secondary: Option<&AiConfig>,
) -> Arc<dyn ChatProvider> {
    let primario = provider_from_config(primary);
    match secondary {
        Some(cfg) if !cfg.provider.is_empty() && !cfg.model.is_empty() => Arc::new(
            fallback::FallbackProvider::new(primario, provider_from_config(cfg)),
        ),
        Some(cfg) => {
            // Malformed secondary config: log and keep primary only.
            warn!(
                "configuración de fallback de IA incompleta (provider='{}'), se ignora",
                cfg.provider
            );
            primario
        }
        None => primario,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seleccion_de_proveedor() {
        let cfg = AiConfig {
            provider: "anthropic".into(),
            api_key: "k".into(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: String::new(),
        };
        assert_eq!(provider_from_config(&cfg).name(), "anthropic");

        let cfg = AiConfig {
            provider: "ollama".into(),
            api_key: String::new(),
            model: "llama3.1".into(),
            base_url: "http://localhost:11434".into(),
        };
        assert_eq!(provider_from_config(&cfg).name(), "ollama");
    }

    #[test]
    fn fallback_incompleto_se_ignora() {
        let primary = AiConfig {
            provider: "ollama".into(),
            api_key: String::new(),
            model: "llama3.1".into(),
            base_url: "http://localhost:11434".into(),
        };
        let bad = AiConfig {
            provider: "anthropic".into(),
            api_key: "k".into(),
            model: String::new(),
            base_url: String::new(),
        };
        let provider = provider_from_env(&primary, Some(&bad));
        assert_eq!(provider.name(), "ollama");

        let good = AiConfig {
            provider: "anthropic".into(),
            api_key: "k".into(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: String::new(),
        };
        let provider = provider_from_env(&primary, Some(&good));
        assert_eq!(provider.name(), "fallback");
    }
}
