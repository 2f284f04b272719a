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
use crate::shared::models::CanalWhatsApp;
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/canales/whatsapp", get(listar))
        .route("/canales/whatsapp", post(crear))
        .route("/canales/whatsapp/:id", patch(actualizar))
        .route("/canales/whatsapp/:id", delete(eliminar))
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let canales = blocking(&state.conn, move |conn| {
        use crate::shared::schema::canales_whatsapp::dsl as cw;
        cw::canales_whatsapp
            .filter(cw::tenant_id.eq(tenant_id))
            .order(cw::created_at.asc())
            .select(CanalWhatsApp::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(canales))
}

#[derive(Debug, Deserialize)]
struct CrearCanalRequest {
    nombre: String,
    phone_number_id: String,
    display_phone: Option<String>,
    access_token: String,
    verify_token: String,
    chatbot_id: Option<Uuid>,
}

async fn crear(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CrearCanalRequest>,
) -> Result<axum::response::Response, AppError> {
    if body.nombre.trim().is_empty()
        || body.phone_number_id.trim().is_empty()
        || body.access_token.trim().is_empty()
    {
        return Err(AppError::Validation(
            "nombre, phone_number_id y access_token son requeridos".into(),
        ));
    }

    let tenant_id = principal.tenant_id;
    let canal = blocking(&state.conn, move |conn| {
        use crate::shared::schema::canales_whatsapp::dsl as cw;
        use crate::shared::schema::chatbots::dsl as c;

        planes::validar_creacion(conn, tenant_id, Recurso::CanalesWhatsapp)?;
        planes::validar_funcionalidad(conn, tenant_id, "whatsapp", |u| u.tiene_whatsapp)?;

        // El phone_number_id resuelve el tenant en el webhook; debe ser
        // unico entre canales activos de toda la plataforma.
        let repetido: i64 = cw::canales_whatsapp
            .filter(cw::phone_number_id.eq(body.phone_number_id.trim()))
            .filter(cw::activo.eq(true))
            .count()
            .get_result(conn)?;
        if repetido > 0 {
            return Err(AppError::Conflict(
                "ese phone_number_id ya esta registrado".into(),
            ));
        }

        if let Some(chatbot_id) = body.chatbot_id {
            let existe: i64 = c::chatbots
                .filter(c::id.eq(chatbot_id))
                .filter(c::tenant_id.eq(tenant_id))
                .filter(c::activo.eq(true))
                .count()
                .get_result(conn)?;
            if existe == 0 {
                return Err(AppError::Validation("chatbot_id no pertenece al tenant".into()));
            }
        }

        let id = Uuid::new_v4();
        diesel::insert_into(cw::canales_whatsapp)
            .values((
                cw::id.eq(id),
                cw::tenant_id.eq(tenant_id),
                cw::nombre.eq(body.nombre.trim()),
                cw::phone_number_id.eq(body.phone_number_id.trim()),
                cw::display_phone.eq(body.display_phone),
                cw::access_token.eq(body.access_token),
                cw::verify_token.eq(body.verify_token),
                cw::chatbot_id.eq(body.chatbot_id),
                cw::activo.eq(true),
            ))
            .execute(conn)?;
        cw::canales_whatsapp
            .filter(cw::id.eq(id))
            .select(CanalWhatsApp::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("canal whatsapp {} registrado en tenant {}", canal.id, tenant_id);
    Ok(created(canal))
}

#[derive(Debug, Deserialize)]
struct ActualizarCanalRequest {
    nombre: Option<String>,
    display_phone: Option<String>,
    access_token: Option<String>,
    verify_token: Option<String>,
    chatbot_id: Option<Option<Uuid>>,
    activo: Option<bool>,
}

async fn actualizar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(canal_id): Path<Uuid>,
    Json(body): Json<ActualizarCanalRequest>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let canal = blocking(&state.conn, move |conn| {
        use crate::shared::schema::canales_whatsapp::dsl as cw;

        let existe: i64 = cw::canales_whatsapp
            .filter(cw::id.eq(canal_id))
            .filter(cw::tenant_id.eq(tenant_id))
            .count()
            .get_result(conn)?;
        if existe == 0 {
            return Err(AppError::NotFound("canal no encontrado".into()));
        }

        diesel::update(cw::canales_whatsapp.filter(cw::id.eq(canal_id)))
            .set((
                body.nombre.map(|v| cw::nombre.eq(v)),
                body.display_phone.map(|v| cw::display_phone.eq(v)),
                body.access_token.map(|v| cw::access_token.eq(v)),
                body.verify_token.map(|v| cw::verify_token.eq(v)),
                body.chatbot_id.map(|v| cw::chatbot_id.eq(v)),
                body.activo.map(|v| cw::activo.eq(v)),
                cw::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        cw::canales_whatsapp
            .filter(cw::id.eq(canal_id))
            .select(CanalWhatsApp::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(canal))
}

async fn eliminar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(canal_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::canales_whatsapp::dsl as cw;
        let afectadas = diesel::update(
            cw::canales_whatsapp
                .filter(cw::id.eq(canal_id))
                .filter(cw::tenant_id.eq(tenant_id))
                .filter(cw::activo.eq(true)),
        )
        .set((cw::activo.eq(false), cw::updated_at.eq(Utc::now())))
        .execute(conn)?;
        if afectadas == 0 {
            return Err(AppError::NotFound("canal no encontrado".into()));
        }
        Ok(())
    })
    .await?;

    info!("canal whatsapp {} desactivado en tenant {}", canal_id, tenant_id);
    Ok(no_content())
}
