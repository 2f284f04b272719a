use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use diesel::prelude::*;
use log::debug;
use uuid::Uuid;

use super::jwt;
use crate::shared::errors::AppError;
use crate::shared::models::rol_usuario;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

/// Identidad autenticada que viaja como extension de request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub rol: String,
    pub sede_id: Option<Uuid>,
}

impl Principal {
    pub fn es_admin(&self) -> bool {
        self.rol == rol_usuario::ADMIN
    }
}

/// Un JWT firmado no basta: la fila de `sesiones` debe existir, estar
/// activa y no haber vencido. Logout apaga la fila y revoca el token.
fn exigir_sesion_viva(
    fila: Option<(bool, chrono::DateTime<chrono::Utc>)>,
) -> Result<(), AppError> {
    match fila {
        Some((true, expira_en)) if expira_en > chrono::Utc::now() => Ok(()),
        _ => Err(AppError::TokenInvalid),
    }
}

fn extraer_bearer(req: &Request) -> Result<String, AppError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::TokenRequired)?;
    let token = header.strip_prefix("Bearer ").ok_or(AppError::TokenInvalid)?;
    if token.is_empty() {
        return Err(AppError::TokenInvalid);
    }
    Ok(token.to_string())
}

/// Valida el JWT, comprueba que la sesion siga viva en `sesiones` (la
/// tabla es la lista de revocacion: logout apaga la fila) y que el tenant
/// y el usuario sigan activos.
pub async fn requerir_sesion(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extraer_bearer(&req)?;
    let claims = jwt::parse(&token, &state.config.jwt.secret)?;

    let tenant_id = claims.tenant_id;
    let user_id = claims.user_id;
    let hash = super::hash_token(&token);
    let (sesion, tenant_activo, usuario_activo) = blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;
        use crate::shared::schema::sesiones::dsl as s;
        use crate::shared::schema::usuarios_admin::dsl as u;

        let sesion: Option<(bool, chrono::DateTime<chrono::Utc>)> = s::sesiones
            .filter(s::token_hash.eq(&hash))
            .select((s::activa, s::expira_en))
            .first(conn)
            .optional()?;
        let tenant_activo: Option<bool> = t::configuracion_tenant
            .filter(t::id.eq(tenant_id))
            .select(t::activo)
            .first(conn)
            .optional()?;
        let usuario_activo: Option<bool> = u::usuarios_admin
            .filter(u::id.eq(user_id))
            .filter(u::tenant_id.eq(tenant_id))
            .select(u::activo)
            .first(conn)
            .optional()?;
        Ok((sesion, tenant_activo, usuario_activo))
    })
    .await?;

    if let Err(e) = exigir_sesion_viva(sesion) {
        debug!("sesion rechazada: revocada, vencida o sin fila para usuario {}", user_id);
        return Err(e);
    }
    if tenant_activo != Some(true) {
        debug!("sesion rechazada: tenant {} inactivo o inexistente", tenant_id);
        return Err(AppError::CuentaInactiva);
    }
    if usuario_activo != Some(true) {
        debug!("sesion rechazada: usuario {} inactivo o inexistente", user_id);
        return Err(AppError::CuentaInactiva);
    }

    req.extensions_mut().insert(Principal {
        tenant_id: claims.tenant_id,
        user_id: claims.user_id,
        rol: claims.rol,
        sede_id: claims.sede_id,
    });
    Ok(next.run(req).await)
}

/// Capa adicional para rutas que exigen rol ADMIN.
pub async fn requerir_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let principal = req
        .extensions()
        .get::<Principal>()
        .ok_or(AppError::TokenRequired)?;
    if !principal.es_admin() {
        return Err(AppError::RolInsuficiente);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn sesion_activa_y_vigente_pasa() {
        let fila = Some((true, Utc::now() + Duration::hours(1)));
        assert!(exigir_sesion_viva(fila).is_ok());
    }

    #[test]
    fn sesion_revocada_por_logout_es_rechazada() {
        let fila = Some((false, Utc::now() + Duration::hours(1)));
        let err = exigir_sesion_viva(fila).unwrap_err();
        assert_eq!(err.code(), "TOKEN_INVALID");
    }

    #[test]
    fn sesion_vencida_es_rechazada() {
        let fila = Some((true, Utc::now() - Duration::minutes(1)));
        assert!(exigir_sesion_viva(fila).is_err());
    }

    #[test]
    fn token_sin_fila_de_sesion_es_rechazado() {
        assert!(exigir_sesion_viva(None).is_err());
    }
}
