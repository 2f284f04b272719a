use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError};

/// Google Gemini backend. Role mapping: `assistant -> model`; the system
/// prompt travels in `systemInstruction`.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(
            api_key,
            model,
            "https://generativelanguage.googleapis.com/v1beta".into(),
        )
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
impl ChatProvider for GeminiProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": request.max_tokens },
        });
        if !request.system.is_empty() {
            body["systemInstruction"] =
                serde_json::json!({"parts": [{"text": request.system}]});
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http {
                provider: "gemini".into(),
                source: e,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "gemini".into(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let result: Value = response.json().await.map_err(|e| LlmError::Http {
            provider: "gemini".into(),
            source: e,
        })?;

        let text = result["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "gemini".into(),
                message: "sin candidates[0].content.parts[0].text".into(),
            })?
            .to_string();

        Ok(ChatResponse {
            text,
            input_tokens: result["usageMetadata"]["promptTokenCount"]
                .as_i64()
                .unwrap_or(0),
            output_tokens: result["usageMetadata"]["candidatesTokenCount"]
                .as_i64()
                .unwrap_or(0),
            provider: "gemini".into(),
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[tokio::test]
    async fn assistant_se_mapea_a_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.0-flash:generateContent")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "g-key".into()))
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hola"}]},
                    {"role": "model", "parts": [{"text": "buenas"}]},
                    {"role": "user", "parts": [{"text": "gracias"}]},
                ],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"de nada"}]}}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":2}}"#,
            )
            .create_async()
            .await;

        let provider =
            GeminiProvider::with_base_url("g-key".into(), "gemini-2.0-flash".into(), server.url());
        let response = provider
            .chat(&ChatRequest {
                system: "instrucciones".into(),
                messages: vec![
                    ChatMessage::user("hola"),
                    ChatMessage::assistant("buenas"),
                    ChatMessage::user("gracias"),
                ],
                max_tokens: 600,
            })
            .await
            .expect("respuesta");

        assert_eq!(response.text, "de nada");
        mock.assert_async().await;
    }
}
