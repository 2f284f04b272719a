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
use crate::shared::models::{NuevaSede, Sede};
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sedes", get(listar))
        .route("/sedes", post(crear))
        .route("/sedes/:id", patch(actualizar))
        .route("/sedes/:id", delete(eliminar))
        .route("/sedes/:id/principal", post(marcar_principal))
}

/// Slug: minusculas, alfanumerico y guiones, derivado del nombre.
pub fn slugificar(nombre: &str) -> String {
    let mut slug = String::with_capacity(nombre.len());
    let mut anterior_guion = true;
    for c in nombre.chars() {
        let c = match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        };
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            anterior_guion = false;
        } else if !anterior_guion {
            slug.push('-');
            anterior_guion = true;
        }
    }
    slug.trim_matches('-').to_string()
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let sedes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;
        s::sedes
            .filter(s::tenant_id.eq(tenant_id))
            .order((s::es_principal.desc(), s::nombre.asc()))
            .select(Sede::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(sedes))
}

#[derive(Debug, Deserialize)]
struct CrearSedeRequest {
    nombre: String,
    direccion: String,
    latitud: Option<f64>,
    longitud: Option<f64>,
    horario_atencion: Option<serde_json::Value>,
}

async fn crear(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CrearSedeRequest>,
) -> Result<axum::response::Response, AppError> {
    let nombre = body.nombre.trim().to_string();
    if nombre.is_empty() || body.direccion.trim().is_empty() {
        return Err(AppError::Validation("nombre y direccion son requeridos".into()));
    }

    let tenant_id = principal.tenant_id;
    let sede = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;

        planes::validar_creacion(conn, tenant_id, Recurso::Sedes)?;

        let slug = slugificar(&nombre);
        let repetido: i64 = s::sedes
            .filter(s::tenant_id.eq(tenant_id))
            .filter(s::slug.eq(&slug))
            .count()
            .get_result(conn)?;
        if repetido > 0 {
            return Err(AppError::Conflict(format!(
                "ya existe una sede con el slug {}",
                slug
            )));
        }

        // La primera sede del tenant queda como principal automaticamente.
        let existentes: i64 = s::sedes
            .filter(s::tenant_id.eq(tenant_id))
            .count()
            .get_result(conn)?;

        let nueva = NuevaSede {
            id: Uuid::new_v4(),
            tenant_id,
            nombre,
            slug,
            direccion: body.direccion.trim().to_string(),
            latitud: body.latitud,
            longitud: body.longitud,
            horario_atencion: body.horario_atencion,
            es_principal: existentes == 0,
            activo: true,
        };
        diesel::insert_into(s::sedes).values(&nueva).execute(conn)?;

        s::sedes
            .filter(s::id.eq(nueva.id))
            .select(Sede::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("sede {} creada para tenant {}", sede.id, tenant_id);
    Ok(created(sede))
}

#[derive(Debug, Deserialize)]
struct ActualizarSedeRequest {
    nombre: Option<String>,
    direccion: Option<String>,
    latitud: Option<f64>,
    longitud: Option<f64>,
    horario_atencion: Option<serde_json::Value>,
    activo: Option<bool>,
}

async fn actualizar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(sede_id): Path<Uuid>,
    Json(body): Json<ActualizarSedeRequest>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let sede = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;

        let actual: Sede = s::sedes
            .filter(s::id.eq(sede_id))
            .filter(s::tenant_id.eq(tenant_id))
            .select(Sede::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("sede no encontrada".into()))?;

        // La sede principal no puede desactivarse.
        if actual.es_principal && body.activo == Some(false) {
            return Err(AppError::SedePrincipal);
        }

        let nombre = body.nombre.map(|n| n.trim().to_string());
        if let Some(n) = &nombre {
            if n.is_empty() {
                return Err(AppError::Validation("nombre no puede ser vacio".into()));
            }
        }

        diesel::update(s::sedes.filter(s::id.eq(sede_id)))
            .set((
                nombre.clone().map(|n| s::nombre.eq(n)),
                nombre.map(|n| s::slug.eq(slugificar(&n))),
                body.direccion.map(|d| s::direccion.eq(d)),
                body.latitud.map(|v| s::latitud.eq(v)),
                body.longitud.map(|v| s::longitud.eq(v)),
                body.horario_atencion.map(|h| s::horario_atencion.eq(h)),
                body.activo.map(|a| s::activo.eq(a)),
                s::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        s::sedes
            .filter(s::id.eq(sede_id))
            .select(Sede::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(sede))
}

async fn eliminar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(sede_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;

        let actual: Sede = s::sedes
            .filter(s::id.eq(sede_id))
            .filter(s::tenant_id.eq(tenant_id))
            .select(Sede::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("sede no encontrada".into()))?;

        if actual.es_principal {
            return Err(AppError::SedePrincipal);
        }

        diesel::delete(s::sedes.filter(s::id.eq(sede_id))).execute(conn)?;
        Ok(())
    })
    .await?;

    info!("sede {} eliminada del tenant {}", sede_id, tenant_id);
    Ok(no_content())
}

/// Cambia la sede principal en una sola transaccion: desmarca la anterior
/// y marca la nueva, que ademas queda activa.
async fn marcar_principal(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(sede_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let sede = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;

        conn.transaction::<Sede, AppError, _>(|conn| {
            let existe: i64 = s::sedes
                .filter(s::id.eq(sede_id))
                .filter(s::tenant_id.eq(tenant_id))
                .count()
                .get_result(conn)?;
            if existe == 0 {
                return Err(AppError::NotFound("sede no encontrada".into()));
            }

            diesel::update(
                s::sedes
                    .filter(s::tenant_id.eq(tenant_id))
                    .filter(s::es_principal.eq(true)),
            )
            .set(s::es_principal.eq(false))
            .execute(conn)?;

            diesel::update(s::sedes.filter(s::id.eq(sede_id)))
                .set((
                    s::es_principal.eq(true),
                    s::activo.eq(true),
                    s::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            s::sedes
                .filter(s::id.eq(sede_id))
                .select(Sede::as_select())
                .first(conn)
                .map_err(AppError::from)
        })
    })
    .await?;
    Ok(ok(sede))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugificar_normaliza_acentos_y_espacios() {
        assert_eq!(slugificar("Miraflores"), "miraflores");
        assert_eq!(slugificar("San Isidro Centro"), "san-isidro-centro");
        assert_eq!(slugificar("  Ñaña -- Este  "), "nana-este");
        assert_eq!(slugificar("Jesús María"), "jesus-maria");
    }

    #[test]
    fn slugificar_vacio() {
        assert_eq!(slugificar("   "), "");
    }
}
