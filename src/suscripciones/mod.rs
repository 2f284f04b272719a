use axum::{extract::State, routing::get, Extension, Router};
use diesel::prelude::*;
use serde_json::json;

use crate::auth::middleware::Principal;
use crate::planes;
use crate::shared::errors::AppError;
use crate::shared::models::{Plan, Suscripcion};
use crate::shared::responses::ok;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/suscripcion", get(obtener))
        .route("/suscripcion/uso", get(uso))
        .route("/planes", get(catalogo))
}

/// Suscripcion vigente del tenant con su plan. Los overrides viajan tal
/// cual; el front muestra el limite efectivo leyendo /suscripcion/uso.
async fn obtener(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let (suscripcion, plan) = blocking(&state.conn, move |conn| {
        use crate::shared::schema::planes::dsl as p;
        use crate::shared::schema::suscripciones::dsl as s;

        s::suscripciones
            .inner_join(p::planes.on(p::id.eq(s::plan_id)))
            .filter(s::tenant_id.eq(tenant_id))
            .order(s::created_at.desc())
            .select((Suscripcion::as_select(), Plan::as_select()))
            .first::<(Suscripcion, Plan)>(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("el tenant no tiene suscripcion".into()))
    })
    .await?;

    Ok(ok(json!({ "suscripcion": suscripcion, "plan": plan })))
}

async fn uso(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let uso = blocking(&state.conn, move |conn| planes::obtener_uso(conn, tenant_id)).await?;
    Ok(ok(uso))
}

async fn catalogo(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let planes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::planes::dsl as p;
        p::planes
            .filter(p::activo.eq(true))
            .order(p::precio_mensual.asc().nulls_first())
            .select(Plan::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(planes))
}
