pub mod canales;
pub mod memoria;
pub mod pipeline;

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use diesel::prelude::*;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::shared::errors::AppError;
use crate::shared::models::CanalWhatsApp;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

const GRAPH_BASE: &str = "https://graph.facebook.com/v22.0";
const TIMEOUT_PIPELINE: Duration = Duration::from_secs(30);
const TIMEOUT_ENVIO: Duration = Duration::from_secs(15);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/whatsapp", get(verificar).post(recibir))
}

// ---------------------------------------------------------------------------
// Payload de Meta WhatsApp Cloud API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[allow(dead_code)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Value {
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub messages: Vec<MensajeEntrante>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MensajeEntrante {
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub tipo: Option<String>,
    pub text: Option<TextoEntrante>,
}

#[derive(Debug, Deserialize)]
pub struct TextoEntrante {
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerificacionQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Handshake unico del dashboard de Meta. El verify token es global al
/// proceso porque Meta no distingue tenants en este paso.
async fn verificar(
    State(state): State<AppState>,
    Query(q): Query<VerificacionQuery>,
) -> (StatusCode, String) {
    let esperado = &state.config.whatsapp_verify_token;
    if q.mode.as_deref() == Some("subscribe")
        && !esperado.is_empty()
        && q.verify_token.as_deref() == Some(esperado.as_str())
    {
        info!("webhook de whatsapp verificado");
        (StatusCode::OK, q.challenge.unwrap_or_default())
    } else {
        warn!("verificacion de webhook rechazada");
        (StatusCode::FORBIDDEN, String::new())
    }
}

/// Recepcion de eventos. Siempre responde 200 {status:ok}: si Meta no ve
/// el 200 reintenta la entrega y duplica trabajo.
async fn recibir(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<serde_json::Value> {
    for entry in payload.entry {
        for change in entry.changes {
            let Some(value) = change.value else { continue };
            if value.messages.is_empty() {
                // Callbacks de estado y confirmaciones de lectura.
                continue;
            }
            let Some(phone_number_id) = value.metadata.as_ref().and_then(|m| m.phone_number_id.clone())
            else {
                debug!("change sin phone_number_id, se omite");
                continue;
            };

            let canal = match resolver_canal(&state, phone_number_id.clone()).await {
                Ok(Some(canal)) => canal,
                Ok(None) => {
                    warn!("sin canal activo para phone_number_id {}", phone_number_id);
                    continue;
                }
                Err(e) => {
                    error!("error resolviendo canal {}: {}", phone_number_id, e);
                    continue;
                }
            };

            for mensaje in &value.messages {
                procesar_mensaje(&state, &canal, mensaje).await;
            }
        }
    }
    Json(json!({ "status": "ok" }))
}

async fn resolver_canal(
    state: &AppState,
    phone_number_id: String,
) -> Result<Option<CanalWhatsApp>, AppError> {
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::canales_whatsapp::dsl as cw;
        cw::canales_whatsapp
            .filter(cw::phone_number_id.eq(&phone_number_id))
            .filter(cw::activo.eq(true))
            .select(CanalWhatsApp::as_select())
            .first(conn)
            .optional()
            .map_err(AppError::from)
    })
    .await
}

async fn procesar_mensaje(state: &AppState, canal: &CanalWhatsApp, mensaje: &MensajeEntrante) {
    let Some(from) = mensaje.from.clone() else { return };

    let texto = match (mensaje.tipo.as_deref(), &mensaje.text) {
        (Some("text"), Some(t)) => t.body.clone().unwrap_or_default(),
        _ => {
            let aviso =
                "Por ahora solo puedo procesar mensajes de texto. Escribeme tu consulta. 🙏";
            enviar_texto(&canal.access_token, &canal.phone_number_id, &from, aviso).await;
            return;
        }
    };
    if texto.trim().is_empty() {
        return;
    }

    let respuesta =
        match tokio::time::timeout(TIMEOUT_PIPELINE, pipeline::procesar(state, canal, &from, &texto))
            .await
        {
            Ok(respuesta) => respuesta,
            Err(_) => {
                warn!("pipeline excedio {}s para {}", TIMEOUT_PIPELINE.as_secs(), from);
                Some(
                    "Estamos demorando mas de lo normal. Intentalo de nuevo en unos minutos."
                        .to_string(),
                )
            }
        };

    if let Some(cuerpo) = respuesta.filter(|r| !r.is_empty()) {
        enviar_texto(&canal.access_token, &canal.phone_number_id, &from, &cuerpo).await;
    }
}

/// Envio saliente por la graph API de Meta. Best-effort: el error se
/// loguea y no se propaga.
pub async fn enviar_texto(access_token: &str, phone_number_id: &str, to: &str, body: &str) {
    let url = format!("{}/{}/messages", GRAPH_BASE, phone_number_id);
    let cliente = match reqwest::Client::builder().timeout(TIMEOUT_ENVIO).build() {
        Ok(c) => c,
        Err(e) => {
            error!("no se pudo construir el cliente http: {}", e);
            return;
        }
    };

    let resultado = cliente
        .post(&url)
        .bearer_auth(access_token)
        .json(&json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }))
        .send()
        .await;

    match resultado {
        Ok(resp) if resp.status().is_success() => {
            debug!("whatsapp enviado a {}", to);
        }
        Ok(resp) => {
            let status = resp.status();
            let cuerpo = resp.text().await.unwrap_or_default();
            error!("meta respondio {} al enviar a {}: {}", status, to, cuerpo);
        }
        Err(e) => error!("fallo el envio de whatsapp a {}: {}", to, e),
    }
}
