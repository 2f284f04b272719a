use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{NaiveTime, TimeZone, Utc};
use diesel::prelude::*;
use log::{debug, warn};
use uuid::Uuid;

use super::api_keys::hash_api_key;
use crate::shared::errors::AppError;
use crate::shared::models::{ApiKey, Chatbot};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

/// Identidad del Bot API: la key validada y el chatbot con sus permisos.
#[derive(Debug, Clone)]
pub struct BotContext {
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub api_key_id: Uuid,
    pub chatbot: Chatbot,
}

impl BotContext {
    /// Guard de permiso por endpoint.
    pub fn exigir_scope(
        &self,
        nombre: &str,
        flag: impl Fn(&Chatbot) -> bool,
    ) -> Result<(), AppError> {
        if flag(&self.chatbot) {
            Ok(())
        } else {
            Err(AppError::ScopeDenied(nombre.to_string()))
        }
    }
}

/// Autentica `X-API-Key`, aplica rate limiting por minuto (key) y por dia
/// (tenant) contando filas de log, y deja el registro de uso en segundo
/// plano tras responder.
pub async fn requerir_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(AppError::ApiKeyMissing)?;
    let hash = hash_api_key(&key);

    let limite_min = state.config.rate_limit_per_min;
    let limite_dia = state.config.rate_limit_per_day;

    let contexto = blocking(&state.conn, move |conn| {
        use crate::shared::schema::api_key_logs::dsl as l;
        use crate::shared::schema::api_keys::dsl as k;
        use crate::shared::schema::chatbots::dsl as c;

        let api_key: ApiKey = k::api_keys
            .filter(k::key_hash.eq(&hash))
            .filter(k::activa.eq(true))
            .select(ApiKey::as_select())
            .first(conn)
            .optional()?
            .ok_or(AppError::ApiKeyInvalid)?;

        if let Some(expira) = api_key.expira_en {
            if expira < Utc::now() {
                return Err(AppError::ApiKeyExpired);
            }
        }

        let hace_un_minuto = Utc::now() - chrono::Duration::seconds(60);
        let por_minuto: i64 = l::api_key_logs
            .filter(l::api_key_id.eq(api_key.id))
            .filter(l::created_at.gt(hace_un_minuto))
            .count()
            .get_result(conn)?;
        if por_minuto >= limite_min {
            warn!("rate limit por minuto para api key {}", api_key.id);
            return Err(AppError::RateLimitMinute);
        }

        let inicio_dia =
            Utc.from_utc_datetime(&Utc::now().date_naive().and_time(NaiveTime::MIN));
        let por_dia: i64 = l::api_key_logs
            .filter(l::tenant_id.eq(api_key.tenant_id))
            .filter(l::created_at.ge(inicio_dia))
            .count()
            .get_result(conn)?;
        if por_dia >= limite_dia {
            warn!("rate limit diario para tenant {}", api_key.tenant_id);
            return Err(AppError::RateLimitDay);
        }

        let chatbot: Chatbot = c::chatbots
            .filter(c::id.eq(api_key.chatbot_id))
            .select(Chatbot::as_select())
            .first(conn)
            .optional()?
            .ok_or(AppError::ChatbotInactivo)?;
        if !chatbot.activo {
            return Err(AppError::ChatbotInactivo);
        }

        Ok(BotContext {
            tenant_id: api_key.tenant_id,
            chatbot_id: api_key.chatbot_id,
            api_key_id: api_key.id,
            chatbot,
        })
    })
    .await?;

    let endpoint = req.uri().path().to_string();
    let metodo = req.method().to_string();
    let api_key_id = contexto.api_key_id;
    let tenant_id = contexto.tenant_id;

    req.extensions_mut().insert(contexto);
    let respuesta = next.run(req).await;

    // Registro de uso fire-and-forget; la staleness de ultimo_uso es
    // aceptable a cambio de no bloquear el camino caliente.
    let status = respuesta.status().as_u16() as i32;
    let pool = state.conn.clone();
    tokio::spawn(async move {
        let resultado = blocking(&pool, move |conn| {
            use crate::shared::schema::api_key_logs::dsl as l;
            use crate::shared::schema::api_keys::dsl as k;

            diesel::insert_into(l::api_key_logs)
                .values((
                    l::id.eq(Uuid::new_v4()),
                    l::api_key_id.eq(api_key_id),
                    l::tenant_id.eq(tenant_id),
                    l::endpoint.eq(endpoint),
                    l::metodo.eq(metodo),
                    l::status_code.eq(status),
                ))
                .execute(conn)?;
            diesel::update(k::api_keys.filter(k::id.eq(api_key_id)))
                .set(k::ultimo_uso.eq(Utc::now()))
                .execute(conn)?;
            Ok(())
        })
        .await;
        if let Err(e) = resultado {
            debug!("no se pudo registrar uso de api key {}: {}", api_key_id, e);
        }
    });

    Ok(respuesta)
}
