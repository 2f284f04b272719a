pub mod api_keys;
pub mod bot_api;
pub mod middleware;

use axum::{
    extract::{Path, State},
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::planes::{self, Recurso};
use crate::shared::errors::AppError;
use crate::shared::models::{tipo_chatbot, Chatbot};
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chatbots", get(listar))
        .route("/chatbots", post(crear))
        .route("/chatbots/:id", patch(actualizar))
        .route("/chatbots/:id", delete(eliminar))
        .merge(api_keys::router())
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let chatbots = blocking(&state.conn, move |conn| {
        use crate::shared::schema::chatbots::dsl as c;
        c::chatbots
            .filter(c::tenant_id.eq(tenant_id))
            .filter(c::activo.eq(true))
            .order(c::created_at.asc())
            .select(Chatbot::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(chatbots))
}

#[derive(Debug, Deserialize)]
struct CrearChatbotRequest {
    nombre: String,
    tipo: String,
    #[serde(default)]
    puede_leer_reclamos: bool,
    #[serde(default)]
    puede_responder: bool,
    #[serde(default)]
    puede_cambiar_estado: bool,
    #[serde(default)]
    puede_enviar_mensajes: bool,
    #[serde(default)]
    puede_leer_metricas: bool,
}

async fn crear(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CrearChatbotRequest>,
) -> Result<axum::response::Response, AppError> {
    let nombre = body.nombre.trim().to_string();
    if nombre.is_empty() {
        return Err(AppError::Validation("nombre es requerido".into()));
    }
    if !tipo_chatbot::es_valido(&body.tipo) {
        return Err(AppError::Validation(format!("tipo desconocido: {}", body.tipo)));
    }

    let tenant_id = principal.tenant_id;
    let chatbot = blocking(&state.conn, move |conn| {
        use crate::shared::schema::chatbots::dsl as c;

        planes::validar_creacion(conn, tenant_id, Recurso::Chatbots)?;
        planes::validar_funcionalidad(conn, tenant_id, "chatbot", |u| u.tiene_chatbot)?;

        let id = Uuid::new_v4();
        diesel::insert_into(c::chatbots)
            .values((
                c::id.eq(id),
                c::tenant_id.eq(tenant_id),
                c::nombre.eq(nombre),
                c::tipo.eq(body.tipo),
                c::puede_leer_reclamos.eq(body.puede_leer_reclamos),
                c::puede_responder.eq(body.puede_responder),
                c::puede_cambiar_estado.eq(body.puede_cambiar_estado),
                c::puede_enviar_mensajes.eq(body.puede_enviar_mensajes),
                c::puede_leer_metricas.eq(body.puede_leer_metricas),
                c::activo.eq(true),
            ))
            .execute(conn)?;
        c::chatbots
            .filter(c::id.eq(id))
            .select(Chatbot::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("chatbot {} creado en tenant {}", chatbot.id, tenant_id);
    Ok(created(chatbot))
}

#[derive(Debug, Deserialize)]
struct ActualizarChatbotRequest {
    nombre: Option<String>,
    puede_leer_reclamos: Option<bool>,
    puede_responder: Option<bool>,
    puede_cambiar_estado: Option<bool>,
    puede_enviar_mensajes: Option<bool>,
    puede_leer_metricas: Option<bool>,
}

async fn actualizar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chatbot_id): Path<Uuid>,
    Json(body): Json<ActualizarChatbotRequest>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let chatbot = blocking(&state.conn, move |conn| {
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

        diesel::update(c::chatbots.filter(c::id.eq(chatbot_id)))
            .set((
                body.nombre.map(|n| c::nombre.eq(n)),
                body.puede_leer_reclamos.map(|v| c::puede_leer_reclamos.eq(v)),
                body.puede_responder.map(|v| c::puede_responder.eq(v)),
                body.puede_cambiar_estado.map(|v| c::puede_cambiar_estado.eq(v)),
                body.puede_enviar_mensajes.map(|v| c::puede_enviar_mensajes.eq(v)),
                body.puede_leer_metricas.map(|v| c::puede_leer_metricas.eq(v)),
                c::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        c::chatbots
            .filter(c::id.eq(chatbot_id))
            .select(Chatbot::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(chatbot))
}

/// Baja logica del chatbot y revocacion de todas sus API keys, en una sola
/// transaccion.
async fn eliminar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(chatbot_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::api_keys::dsl as k;
        use crate::shared::schema::chatbots::dsl as c;

        conn.transaction::<(), AppError, _>(|conn| {
            let afectadas = diesel::update(
                c::chatbots
                    .filter(c::id.eq(chatbot_id))
                    .filter(c::tenant_id.eq(tenant_id))
                    .filter(c::activo.eq(true)),
            )
            .set((c::activo.eq(false), c::updated_at.eq(Utc::now())))
            .execute(conn)?;
            if afectadas == 0 {
                return Err(AppError::NotFound("chatbot no encontrado".into()));
            }

            diesel::update(k::api_keys.filter(k::chatbot_id.eq(chatbot_id)))
                .set(k::activa.eq(false))
                .execute(conn)?;
            Ok(())
        })
    })
    .await?;

    info!("chatbot {} desactivado con sus keys en tenant {}", chatbot_id, tenant_id);
    Ok(no_content())
}
