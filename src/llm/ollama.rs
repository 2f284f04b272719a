use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError};

/// Local Ollama backend; generous timeout because first-token latency on
/// local hardware can be large.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": request.system}));
        }
        for m in &request.messages {
            messages.push(serde_json::json!({"role": m.role, "content": m.content}));
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
                "options": { "num_predict": request.max_tokens },
            }))
            .send()
            .await
            .map_err(|e| LlmError::Http {
                provider: "ollama".into(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "ollama".into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let result: Value = response.json().await.map_err(|e| LlmError::Http {
            provider: "ollama".into(),
            source: e,
        })?;

        let text = result["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "ollama".into(),
                message: "sin message.content".into(),
            })?
            .to_string();

        Ok(ChatResponse {
            text,
            input_tokens: result["prompt_eval_count"].as_i64().unwrap_or(0),
            output_tokens: result["eval_count"].as_i64().unwrap_or(0),
            provider: "ollama".into(),
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn chat_contra_servidor_simulado() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"message":{"role":"assistant","content":"hola"},"prompt_eval_count":12,"eval_count":3}"#,
            )
            .create_async()
            .await;

        let provider = OllamaProvider::new(server.url(), "llama3.1".into());
        let response = provider
            .chat(&ChatRequest {
                system: "eres un asistente".into(),
                messages: vec![ChatMessage::user("hola")],
                max_tokens: 600,
            })
            .await
            .expect("respuesta");

        assert_eq!(response.text, "hola");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_http_se_propaga() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let provider = OllamaProvider::new(server.url(), "llama3.1".into());
        let err = provider
            .chat(&ChatRequest {
                system: String::new(),
                messages: vec![ChatMessage::user("hola")],
                max_tokens: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider { .. }));
    }
}
