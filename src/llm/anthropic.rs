use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError};

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, "https://api.anthropic.com/v1".into())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        // El system prompt va fuera de messages; solo user/assistant dentro.
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": request.max_tokens,
                "system": request.system,
                "messages": messages,
            }))
            .send()
            .await
            .map_err(|e| LlmError::Http {
                provider: "anthropic".into(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let result: Value = response.json().await.map_err(|e| LlmError::Http {
            provider: "anthropic".into(),
            source: e,
        })?;

        let text = result["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "anthropic".into(),
                message: "sin content[0].text".into(),
            })?
            .to_string();

        Ok(ChatResponse {
            text,
            input_tokens: result["usage"]["input_tokens"].as_i64().unwrap_or(0),
            output_tokens: result["usage"]["output_tokens"].as_i64().unwrap_or(0),
            provider: "anthropic".into(),
        })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn system_va_fuera_de_messages() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "secreta")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "system": "instrucciones",
                "messages": [{"role": "user", "content": "hola"}],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"content":[{"type":"text","text":"buenas"}],"usage":{"input_tokens":9,"output_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider =
            AnthropicProvider::with_base_url("secreta".into(), "claude".into(), server.url());
        let response = provider
            .chat(&ChatRequest {
                system: "instrucciones".into(),
                messages: vec![ChatMessage::user("hola")],
                max_tokens: 600,
            })
            .await
            .expect("respuesta");

        assert_eq!(response.text, "buenas");
        assert_eq!(response.input_tokens, 9);
        mock.assert_async().await;
    }
}
