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
use crate::shared::models::{rol_usuario, NuevoUsuarioAdmin, UsuarioAdmin};
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

const BCRYPT_COST: u32 = 12;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/usuarios", get(listar))
        .route("/usuarios", post(crear))
        .route("/usuarios/:id", patch(actualizar))
        .route("/usuarios/:id", delete(eliminar))
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let usuarios = blocking(&state.conn, move |conn| {
        use crate::shared::schema::usuarios_admin::dsl as u;
        u::usuarios_admin
            .filter(u::tenant_id.eq(tenant_id))
            .order(u::created_at.asc())
            .select(UsuarioAdmin::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(usuarios))
}

#[derive(Debug, Deserialize)]
struct CrearUsuarioRequest {
    nombre_completo: String,
    email: String,
    password: String,
    rol: String,
    sede_id: Option<Uuid>,
}

fn validar_password(password: &str) -> Result<(), AppError> {
    if password.len() < 8 {
        return Err(AppError::Validation(
            "el password debe tener al menos 8 caracteres".into(),
        ));
    }
    Ok(())
}

async fn crear(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CrearUsuarioRequest>,
) -> Result<axum::response::Response, AppError> {
    let email = body.email.trim().to_lowercase();
    let nombre = body.nombre_completo.trim().to_string();
    if nombre.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("nombre_completo y email son requeridos".into()));
    }
    if !rol_usuario::es_valido(&body.rol) {
        return Err(AppError::Validation(format!("rol desconocido: {}", body.rol)));
    }
    validar_password(&body.password)?;

    let password_hash =
        bcrypt::hash(&body.password, BCRYPT_COST).map_err(AppError::internal)?;

    let tenant_id = principal.tenant_id;
    let usuario = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;
        use crate::shared::schema::usuarios_admin::dsl as u;

        planes::validar_creacion(conn, tenant_id, Recurso::Usuarios)?;

        // El email es el identificador de login, unico en toda la plataforma.
        let repetido: i64 = u::usuarios_admin
            .filter(u::email.eq(&email))
            .count()
            .get_result(conn)?;
        if repetido > 0 {
            return Err(AppError::Conflict(format!("el email {} ya esta registrado", email)));
        }

        if let Some(sede_id) = body.sede_id {
            let existe: i64 = s::sedes
                .filter(s::id.eq(sede_id))
                .filter(s::tenant_id.eq(tenant_id))
                .count()
                .get_result(conn)?;
            if existe == 0 {
                return Err(AppError::Validation("sede_id no pertenece al tenant".into()));
            }
        }

        let nuevo = NuevoUsuarioAdmin {
            id: Uuid::new_v4(),
            tenant_id,
            nombre_completo: nombre,
            email,
            password_hash,
            rol: body.rol,
            sede_id: body.sede_id,
            activo: true,
        };
        diesel::insert_into(u::usuarios_admin).values(&nuevo).execute(conn)?;

        u::usuarios_admin
            .filter(u::id.eq(nuevo.id))
            .select(UsuarioAdmin::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;

    info!("usuario {} creado en tenant {}", usuario.id, tenant_id);
    Ok(created(usuario))
}

#[derive(Debug, Deserialize)]
struct ActualizarUsuarioRequest {
    nombre_completo: Option<String>,
    password: Option<String>,
    rol: Option<String>,
    sede_id: Option<Option<Uuid>>,
    activo: Option<bool>,
}

/// Cuenta los ADMIN activos del tenant sin contar al usuario dado.
fn otros_admins_activos(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    excluido: Uuid,
) -> Result<i64, AppError> {
    use crate::shared::schema::usuarios_admin::dsl as u;
    u::usuarios_admin
        .filter(u::tenant_id.eq(tenant_id))
        .filter(u::rol.eq(rol_usuario::ADMIN))
        .filter(u::activo.eq(true))
        .filter(u::id.ne(excluido))
        .count()
        .get_result(conn)
        .map_err(AppError::from)
}

async fn actualizar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(usuario_id): Path<Uuid>,
    Json(body): Json<ActualizarUsuarioRequest>,
) -> Result<axum::response::Response, AppError> {
    if let Some(rol) = &body.rol {
        if !rol_usuario::es_valido(rol) {
            return Err(AppError::Validation(format!("rol desconocido: {}", rol)));
        }
    }
    let password_hash = match &body.password {
        Some(p) => {
            validar_password(p)?;
            Some(bcrypt::hash(p, BCRYPT_COST).map_err(AppError::internal)?)
        }
        None => None,
    };

    let tenant_id = principal.tenant_id;
    let usuario = blocking(&state.conn, move |conn| {
        use crate::shared::schema::usuarios_admin::dsl as u;

        let actual: UsuarioAdmin = u::usuarios_admin
            .filter(u::id.eq(usuario_id))
            .filter(u::tenant_id.eq(tenant_id))
            .select(UsuarioAdmin::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("usuario no encontrado".into()))?;

        // No se puede dejar al tenant sin ningun ADMIN activo.
        let degrada = actual.rol == rol_usuario::ADMIN
            && (body.activo == Some(false)
                || matches!(&body.rol, Some(r) if r != rol_usuario::ADMIN));
        if degrada && otros_admins_activos(conn, tenant_id, usuario_id)? == 0 {
            return Err(AppError::Conflict(
                "el tenant debe conservar al menos un ADMIN activo".into(),
            ));
        }

        diesel::update(u::usuarios_admin.filter(u::id.eq(usuario_id)))
            .set((
                body.nombre_completo.map(|n| u::nombre_completo.eq(n)),
                password_hash.map(|h| u::password_hash.eq(h)),
                body.rol.map(|r| u::rol.eq(r)),
                body.sede_id.map(|s| u::sede_id.eq(s)),
                body.activo.map(|a| u::activo.eq(a)),
                u::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        u::usuarios_admin
            .filter(u::id.eq(usuario_id))
            .select(UsuarioAdmin::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(usuario))
}

async fn eliminar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(usuario_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::usuarios_admin::dsl as u;

        let actual: UsuarioAdmin = u::usuarios_admin
            .filter(u::id.eq(usuario_id))
            .filter(u::tenant_id.eq(tenant_id))
            .select(UsuarioAdmin::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound("usuario no encontrado".into()))?;

        if actual.rol == rol_usuario::ADMIN
            && otros_admins_activos(conn, tenant_id, usuario_id)? == 0
        {
            return Err(AppError::Conflict(
                "el tenant debe conservar al menos un ADMIN activo".into(),
            ));
        }

        // Baja logica; las sesiones dejan de pasar el middleware.
        diesel::update(u::usuarios_admin.filter(u::id.eq(usuario_id)))
            .set((u::activo.eq(false), u::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    info!("usuario {} desactivado en tenant {}", usuario_id, tenant_id);
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_corto_es_rechazado() {
        assert!(validar_password("1234567").is_err());
        assert!(validar_password("12345678").is_ok());
    }
}
