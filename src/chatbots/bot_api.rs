use axum::{
    extract::{Path, Query, State},
    middleware as axum_middleware,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use uuid::Uuid;

use super::middleware::{requerir_api_key, BotContext};
use crate::shared::errors::AppError;
use crate::shared::models::{
    estado_reclamo, remitente, tipo_accion, NuevoHistorialEvento, Reclamo, ReclamoMensaje,
};
use crate::shared::responses::{created, ok, Paginado};
use crate::shared::state::AppState;
use crate::shared::utils::{blocking, paginacion};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/reclamos", get(listar))
        .route("/reclamos/:id", get(detalle))
        .route("/reclamos/:id/mensajes", post(enviar_mensaje))
        .route("/reclamos/:id/estado", patch(cambiar_estado))
        .route_layer(axum_middleware::from_fn_with_state(state, requerir_api_key))
}

#[derive(Debug, Deserialize)]
struct FiltrosBot {
    page: Option<i64>,
    per_page: Option<i64>,
    estado: Option<String>,
}

async fn listar(
    State(state): State<AppState>,
    Extension(ctx): Extension<BotContext>,
    Query(filtros): Query<FiltrosBot>,
) -> Result<axum::response::Response, AppError> {
    ctx.exigir_scope("leer_reclamos", |c| c.puede_leer_reclamos)?;

    let tenant_id = ctx.tenant_id;
    let (page, per_page) = paginacion(filtros.page, filtros.per_page);
    let listado = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamos::dsl as r;

        let armar = || {
            let mut q = r::reclamos
                .filter(r::tenant_id.eq(tenant_id))
                .filter(r::deleted_at.is_null())
                .into_boxed();
            if let Some(estado) = &filtros.estado {
                q = q.filter(r::estado.eq(estado.clone()));
            }
            q
        };

        let total: i64 = armar().count().get_result(conn)?;
        let items: Vec<Reclamo> = armar()
            .order(r::fecha_registro.desc())
            .limit(per_page)
            .offset((page - 1) * per_page)
            .select(Reclamo::as_select())
            .load(conn)?;
        Ok(Paginado::new(items, total, page, per_page))
    })
    .await?;
    Ok(ok(listado))
}

fn cargar_reclamo(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    reclamo_id: Uuid,
) -> Result<Reclamo, AppError> {
    use crate::shared::schema::reclamos::dsl as r;
    r::reclamos
        .filter(r::id.eq(reclamo_id))
        .filter(r::tenant_id.eq(tenant_id))
        .filter(r::deleted_at.is_null())
        .select(Reclamo::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("reclamo no encontrado".into()))
}

async fn detalle(
    State(state): State<AppState>,
    Extension(ctx): Extension<BotContext>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    ctx.exigir_scope("leer_reclamos", |c| c.puede_leer_reclamos)?;

    let tenant_id = ctx.tenant_id;
    let reclamo =
        blocking(&state.conn, move |conn| cargar_reclamo(conn, tenant_id, reclamo_id)).await?;
    Ok(ok(reclamo))
}

#[derive(Debug, Deserialize)]
struct MensajeBotRequest {
    contenido: String,
}

async fn enviar_mensaje(
    State(state): State<AppState>,
    Extension(ctx): Extension<BotContext>,
    Path(reclamo_id): Path<Uuid>,
    Json(body): Json<MensajeBotRequest>,
) -> Result<axum::response::Response, AppError> {
    ctx.exigir_scope("enviar_mensajes", |c| c.puede_enviar_mensajes)?;

    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }

    let tenant_id = ctx.tenant_id;
    let mensaje = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_mensajes::dsl as m;
        let reclamo = cargar_reclamo(conn, tenant_id, reclamo_id)?;
        if reclamo.estado == estado_reclamo::CERRADO {
            return Err(AppError::Conflict("el reclamo ya esta cerrado".into()));
        }
        let id = Uuid::new_v4();
        diesel::insert_into(m::reclamo_mensajes)
            .values((
                m::id.eq(id),
                m::reclamo_id.eq(reclamo_id),
                m::tenant_id.eq(tenant_id),
                m::remitente.eq(remitente::CHATBOT),
                m::contenido.eq(contenido),
                m::leido.eq(false),
            ))
            .execute(conn)?;
        m::reclamo_mensajes
            .filter(m::id.eq(id))
            .select(ReclamoMensaje::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(created(mensaje))
}

#[derive(Debug, Deserialize)]
struct EstadoBotRequest {
    estado: String,
    comentario: Option<String>,
}

async fn cambiar_estado(
    State(state): State<AppState>,
    Extension(ctx): Extension<BotContext>,
    Path(reclamo_id): Path<Uuid>,
    Json(body): Json<EstadoBotRequest>,
) -> Result<axum::response::Response, AppError> {
    ctx.exigir_scope("cambiar_estado", |c| c.puede_cambiar_estado)?;

    if !estado_reclamo::TODOS.contains(&body.estado.as_str()) {
        return Err(AppError::Validation(format!("estado desconocido: {}", body.estado)));
    }

    let tenant_id = ctx.tenant_id;
    let chatbot_id = ctx.chatbot_id;
    let reclamo = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_historial::dsl as h;
        use crate::shared::schema::reclamos::dsl as r;

        conn.transaction::<Reclamo, AppError, _>(|conn| {
            let actual = cargar_reclamo(conn, tenant_id, reclamo_id)?;
            if !estado_reclamo::transicion_valida(&actual.estado, &body.estado) {
                return Err(AppError::Conflict(format!(
                    "transicion invalida: {} -> {}",
                    actual.estado, body.estado
                )));
            }

            let ahora = Utc::now();
            let fecha_cierre = match body.estado.as_str() {
                estado_reclamo::CERRADO | estado_reclamo::RECHAZADO => Some(ahora),
                _ => None,
            };
            diesel::update(r::reclamos.filter(r::id.eq(reclamo_id)))
                .set((
                    r::estado.eq(&body.estado),
                    r::fecha_cierre.eq(fecha_cierre),
                    r::updated_at.eq(ahora),
                ))
                .execute(conn)?;

            diesel::insert_into(h::reclamo_historial)
                .values(&NuevoHistorialEvento {
                    id: Uuid::new_v4(),
                    reclamo_id,
                    tenant_id,
                    estado_anterior: Some(actual.estado.clone()),
                    estado_nuevo: Some(body.estado.clone()),
                    tipo_accion: tipo_accion::CAMBIO_ESTADO.to_string(),
                    comentario: body.comentario.clone(),
                    usuario_id: None,
                    chatbot_id: Some(chatbot_id),
                    ip: None,
                })
                .execute(conn)?;

            cargar_reclamo(conn, tenant_id, reclamo_id)
        })
    })
    .await?;

    info!(
        "chatbot {} cambio reclamo {} a {}",
        chatbot_id, reclamo.codigo, reclamo.estado
    );
    Ok(ok(reclamo))
}
