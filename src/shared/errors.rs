use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::error;

/// Typed error carried by every service. Serialises as
/// `{"success":false,"error":{"code":...,"message":...}}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // --- authentication ---
    #[error("Token requerido")]
    TokenRequired,
    #[error("Token inválido o expirado")]
    TokenInvalid,
    #[error("Credenciales inválidas")]
    CredencialesInvalidas,
    #[error("La cuenta está inactiva")]
    CuentaInactiva,
    #[error("Rol insuficiente para esta operación")]
    RolInsuficiente,

    // --- API keys / bot API ---
    #[error("API key requerida")]
    ApiKeyMissing,
    #[error("API key inválida")]
    ApiKeyInvalid,
    #[error("API key expirada")]
    ApiKeyExpired,
    #[error("Permiso de chatbot denegado: {0}")]
    ScopeDenied(String),
    #[error("Límite de peticiones por minuto excedido")]
    RateLimitMinute,
    #[error("Límite de peticiones diario excedido")]
    RateLimitDay,

    // --- plan enforcement ---
    #[error("{message}")]
    LimitePlanExcedido {
        codigo: &'static str,
        message: String,
    },
    #[error("La funcionalidad {0} no está disponible en su plan")]
    FuncionalidadNoDisponible(String),
    #[error("El tenant no tiene una suscripción activa")]
    SuscripcionInactiva,
    #[error("Conflicto de versión: el registro fue modificado por otro usuario")]
    OptimisticLock,

    // --- state machines ---
    #[error("La solicitud de asesor ya está cerrada")]
    SolicitudCerrada,
    #[error("Límite de solicitudes abiertas alcanzado")]
    LimiteSolicitudes,
    #[error("El chatbot está inactivo")]
    ChatbotInactivo,
    #[error("La sede principal no puede desactivarse")]
    SedePrincipal,

    // --- generic ---
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Error interno del servidor")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TokenRequired
            | Self::TokenInvalid
            | Self::CredencialesInvalidas
            | Self::ApiKeyMissing
            | Self::ApiKeyInvalid
            | Self::ApiKeyExpired => StatusCode::UNAUTHORIZED,
            Self::CuentaInactiva
            | Self::RolInsuficiente
            | Self::ScopeDenied(_)
            | Self::LimitePlanExcedido { .. }
            | Self::FuncionalidadNoDisponible(_)
            | Self::SuscripcionInactiva
            | Self::SolicitudCerrada
            | Self::ChatbotInactivo
            | Self::SedePrincipal => StatusCode::FORBIDDEN,
            Self::RateLimitMinute | Self::RateLimitDay | Self::LimiteSolicitudes => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::OptimisticLock | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenRequired => "TOKEN_REQUIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::CredencialesInvalidas => "CREDENCIALES_INVALIDAS",
            Self::CuentaInactiva => "CUENTA_INACTIVA",
            Self::RolInsuficiente => "INSUFFICIENT_ROLE",
            Self::ApiKeyMissing => "API_KEY_MISSING",
            Self::ApiKeyInvalid => "API_KEY_INVALID",
            Self::ApiKeyExpired => "API_KEY_EXPIRED",
            Self::ScopeDenied(_) => "SCOPE_DENIED",
            Self::RateLimitMinute => "RATE_LIMIT_MINUTE",
            Self::RateLimitDay => "RATE_LIMIT_DAY",
            Self::LimitePlanExcedido { codigo, .. } => codigo,
            Self::FuncionalidadNoDisponible(_) => "FUNCIONALIDAD_NO_DISPONIBLE",
            Self::SuscripcionInactiva => "SUSCRIPCION_INACTIVA",
            Self::OptimisticLock => "OPTIMISTIC_LOCK",
            Self::SolicitudCerrada => "SOLICITUD_CERRADA",
            Self::LimiteSolicitudes => "LIMITE_SOLICITUDES",
            Self::ChatbotInactivo => "CHATBOT_INACTIVO",
            Self::SedePrincipal => "SEDE_PRINCIPAL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} no encontrado", what))
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound("Registro no encontrado".into()),
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if let Self::Internal(ref source) = self {
            // Raw cause goes to the log, never to the client.
            error!("internal error: {:#}", source);
        }
        let status = self.status();
        let mut body = serde_json::json!({
            "success": false,
            "error": { "code": self.code(), "message": self.to_string() },
        });
        if matches!(self, Self::RateLimitMinute) {
            body["error"]["retry_after_seconds"] = serde_json::json!(60);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_errors_son_403() {
        let err = AppError::LimitePlanExcedido {
            codigo: "PLAN_LIMIT_RECLAMOS",
            message: "límite alcanzado".into(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "PLAN_LIMIT_RECLAMOS");
        assert_eq!(AppError::SuscripcionInactiva.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::FuncionalidadNoDisponible("whatsapp".into()).code(),
            "FUNCIONALIDAD_NO_DISPONIBLE"
        );
    }

    #[test]
    fn optimistic_lock_es_409() {
        assert_eq!(AppError::OptimisticLock.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::OptimisticLock.code(), "OPTIMISTIC_LOCK");
    }

    #[test]
    fn rate_limit_es_429() {
        assert_eq!(
            AppError::RateLimitMinute.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::RateLimitDay.code(), "RATE_LIMIT_DAY");
    }

    #[test]
    fn not_found_desde_diesel() {
        let err: AppError = diesel::result::Error::NotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn solicitud_cerrada_es_403() {
        assert_eq!(AppError::SolicitudCerrada.code(), "SOLICITUD_CERRADA");
        assert_eq!(AppError::SolicitudCerrada.status(), StatusCode::FORBIDDEN);
    }
}
