use axum::{
    extract::State,
    routing::{get, patch},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;

use crate::auth::middleware::Principal;
use crate::shared::errors::AppError;
use crate::shared::models::{Tenant, TenantUpdate};
use crate::shared::responses::ok;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tenant", get(obtener))
        .route("/tenant", patch(actualizar))
}

async fn obtener(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let tenant = blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;
        t::configuracion_tenant
            .filter(t::id.eq(tenant_id))
            .select(Tenant::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("tenant no encontrado".into()))
    })
    .await?;
    Ok(ok(tenant))
}

#[derive(Debug, Deserialize)]
struct ActualizarTenantRequest {
    version: i32,
    #[serde(flatten)]
    cambios: TenantUpdate,
}

/// El update compara la version enviada contra la fila. Cero filas
/// afectadas con el tenant existente significa escritura concurrente.
async fn actualizar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ActualizarTenantRequest>,
) -> Result<axum::response::Response, AppError> {
    if let Some(plazo) = body.cambios.plazo_respuesta_dias {
        if !(1..=60).contains(&plazo) {
            return Err(AppError::Validation(
                "plazo_respuesta_dias debe estar entre 1 y 60".into(),
            ));
        }
    }

    let tenant_id = principal.tenant_id;
    let tenant = blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;

        let actualizadas = diesel::update(
            t::configuracion_tenant
                .filter(t::id.eq(tenant_id))
                .filter(t::version.eq(body.version)),
        )
        .set((
            &body.cambios,
            t::version.eq(t::version + 1),
            t::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

        if actualizadas == 0 {
            let existe: i64 = t::configuracion_tenant
                .filter(t::id.eq(tenant_id))
                .count()
                .get_result(conn)?;
            if existe == 0 {
                return Err(AppError::NotFound("tenant no encontrado".into()));
            }
            return Err(AppError::OptimisticLock);
        }

        t::configuracion_tenant
            .filter(t::id.eq(tenant_id))
            .select(Tenant::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("tenant {} actualizado a version {}", tenant.id, tenant.version);
    Ok(ok(tenant))
}
