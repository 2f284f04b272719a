use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use diesel::prelude::*;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::shared::errors::AppError;
use crate::shared::models::{entorno_api_key, ApiKey};
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chatbots/:id/api-keys", get(listar))
        .route("/chatbots/:id/api-keys", post(emitir))
        .route("/chatbots/:id/api-keys/:key_id", delete(revocar))
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Genera `prefijo_entorno_<32 alfanumericos>`. El texto plano solo existe
/// en la respuesta de emision; la tabla guarda hash y prefijo de muestra.
fn generar_key(prefijo: &str, entorno: &str) -> String {
    let cola: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}_{}_{}", prefijo, entorno.to_lowercase(), cola)
}

fn verificar_chatbot(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    chatbot_id: Uuid,
) -> Result<(), AppError> {
    use crate::shared::schema::chatbots::dsl as c;
    let existe: i64 = c::chatbots
        .filter(c::id.eq(chatbot_id))
        .filter(c::tenant_id.eq(tenant_id))
        .filter(c::activo.eq(true))
        .count()
        .get_result(conn)?;
    if existe == 0 {
        return Err(AppError::NotFound("chatbot no encontrado".into()));
    }
    Ok(())
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chatbot_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let keys = blocking(&state.conn, move |conn| {
        use crate::shared::schema::api_keys::dsl as k;
        verificar_chatbot(conn, tenant_id, chatbot_id)?;
        k::api_keys
            .filter(k::chatbot_id.eq(chatbot_id))
            .order(k::created_at.desc())
            .select(ApiKey::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(keys))
}

#[derive(Debug, Deserialize)]
struct EmitirKeyRequest {
    #[serde(default)]
    entorno: Option<String>,
    expira_en: Option<chrono::DateTime<chrono::Utc>>,
}

async fn emitir(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chatbot_id): Path<Uuid>,
    Json(body): Json<EmitirKeyRequest>,
) -> Result<axum::response::Response, AppError> {
    let entorno = match body.entorno.as_deref() {
        None | Some("") => entorno_api_key::LIVE.to_string(),
        Some(e) => {
            let e = e.to_uppercase();
            if e != entorno_api_key::LIVE && e != entorno_api_key::TEST {
                return Err(AppError::Validation("entorno debe ser LIVE o TEST".into()));
            }
            e
        }
    };

    let key = generar_key(&state.config.api_key_prefix, &entorno);
    let key_hash = hash_api_key(&key);
    let prefijo_visible: String = key.chars().take(12).collect();

    let tenant_id = principal.tenant_id;
    let fila = blocking(&state.conn, move |conn| {
        use crate::shared::schema::api_keys::dsl as k;
        verificar_chatbot(conn, tenant_id, chatbot_id)?;

        let id = Uuid::new_v4();
        diesel::insert_into(k::api_keys)
            .values((
                k::id.eq(id),
                k::tenant_id.eq(tenant_id),
                k::chatbot_id.eq(chatbot_id),
                k::prefijo.eq(prefijo_visible),
                k::key_hash.eq(key_hash),
                k::entorno.eq(entorno),
                k::expira_en.eq(body.expira_en),
                k::activa.eq(true),
            ))
            .execute(conn)?;
        k::api_keys
            .filter(k::id.eq(id))
            .select(ApiKey::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("api key {} emitida para chatbot {}", fila.id, chatbot_id);
    // Unica vez que el texto plano sale del servidor.
    Ok(created(json!({ "api_key": key, "detalle": fila })))
}

async fn revocar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((chatbot_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::api_keys::dsl as k;
        verificar_chatbot(conn, tenant_id, chatbot_id)?;

        let afectadas = diesel::update(
            k::api_keys
                .filter(k::id.eq(key_id))
                .filter(k::chatbot_id.eq(chatbot_id))
                .filter(k::activa.eq(true)),
        )
        .set(k::activa.eq(false))
        .execute(conn)?;
        if afectadas == 0 {
            return Err(AppError::NotFound("api key no encontrada".into()));
        }
        Ok(())
    })
    .await?;

    info!("api key {} revocada", key_id);
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formato_de_key_generada() {
        let key = generar_key("lrk", "LIVE");
        assert!(key.starts_with("lrk_live_"));
        assert_eq!(key.len(), "lrk_live_".len() + 32);
    }

    #[test]
    fn hash_es_estable() {
        let key = generar_key("lrk", "TEST");
        assert_eq!(hash_api_key(&key), hash_api_key(&key));
        assert_eq!(hash_api_key(&key).len(), 64);
    }
}
