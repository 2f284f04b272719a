pub mod jwt;
pub mod middleware;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware as axum_middleware,
    routing::post,
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::shared::errors::AppError;
use crate::shared::models::{NuevaSesion, UsuarioAdmin};
use crate::shared::responses::ok;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

use self::middleware::Principal;

pub fn router(state: AppState) -> Router<AppState> {
    let protegido = Router::new()
        .route("/logout", post(logout))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::requerir_sesion,
        ));

    Router::new().route("/login", post(login)).merge(protegido)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<axum::response::Response, AppError> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || body.password.is_empty() {
        return Err(AppError::Validation("email y password son requeridos".into()));
    }

    let email_q = email.clone();
    let usuario: Option<(UsuarioAdmin, bool, String)> = blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;
        use crate::shared::schema::usuarios_admin::dsl as u;

        let fila = u::usuarios_admin
            .inner_join(t::configuracion_tenant.on(t::id.eq(u::tenant_id)))
            .filter(u::email.eq(&email_q))
            .select((UsuarioAdmin::as_select(), t::activo, t::slug))
            .first::<(UsuarioAdmin, bool, String)>(conn)
            .optional()?;
        Ok(fila)
    })
    .await?;

    let (usuario, tenant_activo, tenant_slug) = match usuario {
        Some(fila) => fila,
        None => {
            // bcrypt dummy para no filtrar por tiempo si el email existe o no
            let _ = bcrypt::verify(&body.password, "$2b$12$abcdefghijklmnopqrstuv");
            warn!("login fallido: email desconocido {}", email);
            return Err(AppError::CredencialesInvalidas);
        }
    };

    let password_ok = bcrypt::verify(&body.password, &usuario.password_hash)
        .map_err(AppError::internal)?;
    if !password_ok {
        warn!("login fallido: password incorrecto para {}", email);
        return Err(AppError::CredencialesInvalidas);
    }
    if !tenant_activo || !usuario.activo {
        return Err(AppError::CuentaInactiva);
    }

    let claims = jwt::Claims::new(
        usuario.tenant_id,
        usuario.id,
        usuario.rol.clone(),
        usuario.sede_id,
        state.config.jwt.expiration_hours,
    );
    let token = jwt::generate(&claims, &state.config.jwt.secret)?;
    let expira_en: DateTime<Utc> =
        Utc::now() + Duration::hours(state.config.jwt.expiration_hours);

    let sesion = NuevaSesion {
        id: Uuid::new_v4(),
        tenant_id: usuario.tenant_id,
        usuario_id: usuario.id,
        token_hash: hash_token(&token),
        ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        expira_en,
        activa: true,
    };

    let usuario_id = usuario.id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::sesiones::dsl as s;
        use crate::shared::schema::usuarios_admin::dsl as u;

        diesel::insert_into(s::sesiones).values(&sesion).execute(conn)?;
        diesel::update(u::usuarios_admin.filter(u::id.eq(usuario_id)))
            .set(u::ultimo_acceso.eq(Utc::now()))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    info!("login exitoso: usuario {} tenant {}", usuario.id, usuario.tenant_id);
    Ok(ok(json!({
        "token": token,
        "expires_in": state.config.jwt.expiration_hours * 3600,
        "expira_en": expira_en,
        "usuario": {
            "id": usuario.id,
            "nombre_completo": usuario.nombre_completo,
            "email": usuario.email,
            "rol": usuario.rol,
            "sede_id": usuario.sede_id,
            "tenant_slug": tenant_slug,
        }
    })))
}

async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::TokenRequired)?
        .to_string();
    let hash = hash_token(&token);

    let usuario_id = principal.user_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::sesiones::dsl as s;
        diesel::update(
            s::sesiones
                .filter(s::usuario_id.eq(usuario_id))
                .filter(s::token_hash.eq(hash)),
        )
        .set(s::activa.eq(false))
        .execute(conn)?;
        Ok(())
    })
    .await?;

    Ok(ok(json!({ "mensaje": "sesion cerrada" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_es_hex_sha256() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h, hash_token("abc"));
        assert_ne!(h, hash_token("abd"));
    }
}
