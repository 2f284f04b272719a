use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError};

/// OpenAI-compatible backend (`<base>/chat/completions`); covers OpenAI
/// itself and the self-hosted gateways that speak its dialect.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        let base = if base_url.is_empty() {
            "https://api.openai.com/v1".to_string()
        } else {
            base_url
        };
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
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
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": request.max_tokens,
            }))
            .send()
            .await
            .map_err(|e| LlmError::Http {
                provider: "openai".into(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "openai".into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let result: Value = response.json().await.map_err(|e| LlmError::Http {
            provider: "openai".into(),
            source: e,
        })?;

        let text = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "openai".into(),
                message: "sin choices[0].message.content".into(),
            })?
            .to_string();

        Ok(ChatResponse {
            text,
            input_tokens: result["usage"]["prompt_tokens"].as_i64().unwrap_or(0),
            output_tokens: result["usage"]["completion_tokens"].as_i64().unwrap_or(0),
            provider: "openai".into(),
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn system_se_antepone_a_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-x")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "messages": [
                    {"role": "system", "content": "instrucciones"},
                    {"role": "user", "content": "hola"},
                ],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"content":"buenas"}}],"usage":{"prompt_tokens":7,"completion_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider = OpenAiProvider::new("sk-x".into(), "gpt-4o-mini".into(), server.url());
        let response = provider
            .chat(&ChatRequest {
                system: "instrucciones".into(),
                messages: vec![ChatMessage::user("hola")],
                max_tokens: 600,
            })
            .await
            .expect("respuesta");

        assert_eq!(response.text, "buenas");
        mock.assert_async().await;
    }
}
