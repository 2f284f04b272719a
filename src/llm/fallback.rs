use async_trait::async_trait;
use log::warn;
use std::sync::Arc;

use super::{ChatProvider, ChatRequest, ChatResponse, LlmError};

/// Primary + secondary composition: any error on the primary routes the
/// same request to the secondary; both failing composes one error naming
/// both providers.
pub struct FallbackProvider {
    primary: Arc<dyn ChatProvider>,
    secondary: Arc<dyn ChatProvider>,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn ChatProvider>, secondary: Arc<dyn ChatProvider>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl ChatProvider for FallbackProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let primary_err = match self.primary.chat(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        warn!(
            "proveedor primario '{}' falló ({}), intentando fallback '{}'",
            self.primary.name(),
            primary_err,
            self.secondary.name()
        );
        self.secondary
            .chat(request)
            .await
            .map_err(|secondary_err| LlmError::Provider {
                provider: format!("{}+{}", self.primary.name(), self.secondary.name()),
                message: format!(
                    "primario: {primary_err}; fallback: {secondary_err}"
                ),
            })
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    struct Fijo {
        nombre: &'static str,
        falla: bool,
    }

    #[async_trait]
    impl ChatProvider for Fijo {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
            if self.falla {
                Err(LlmError::Provider {
                    provider: self.nombre.into(),
                    message: "caído".into(),
                })
            } else {
                Ok(ChatResponse {
                    text: format!("desde {}", self.nombre),
                    input_tokens: 1,
                    output_tokens: 1,
                    provider: self.nombre.into(),
                })
            }
        }

        fn name(&self) -> &str {
            self.nombre
        }
    }

    fn peticion() -> ChatRequest {
        ChatRequest {
            system: String::new(),
            messages: vec![ChatMessage::user("hola")],
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn usa_primario_cuando_funciona() {
        let p = FallbackProvider::new(
            Arc::new(Fijo { nombre: "a", falla: false }),
            Arc::new(Fijo { nombre: "b", falla: false }),
        );
        assert_eq!(p.chat(&peticion()).await.unwrap().text, "desde a");
    }

    #[tokio::test]
    async fn cae_al_secundario() {
        let p = FallbackProvider::new(
            Arc::new(Fijo { nombre: "a", falla: true }),
            Arc::new(Fijo { nombre: "b", falla: false }),
        );
        assert_eq!(p.chat(&peticion()).await.unwrap().text, "desde b");
    }

    #[tokio::test]
    async fn error_compuesto_nombra_ambos() {
        let p = FallbackProvider::new(
            Arc::new(Fijo { nombre: "a", falla: true }),
            Arc::new(Fijo { nombre: "b", falla: true }),
        );
        let err = p.chat(&peticion()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("a+b"));
        assert!(msg.contains("primario"));
        assert!(msg.contains("fallback"));
    }
}
