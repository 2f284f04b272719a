use std::time::Duration;

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::llm::{ChatMessage, ChatRequest};
use crate::planes;
use crate::shared::errors::AppError;
use crate::shared::models::{estado_reclamo, ConversacionAsistente, MensajeAsistente, Tenant, UsoTenant};
use crate::shared::responses::{created, no_content, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

const MAX_CONVERSACIONES_ACTIVAS: i64 = 10;
const MAX_MENSAJES_POR_CONVERSACION: i64 = 50;
const DIAS_EXPIRACION: i64 = 7;
// Deadline generoso porque el despliegue tipico favorece Ollama local.
const TIMEOUT_CHAT: Duration = Duration::from_secs(120);
const MAX_TOKENS_RESPUESTA: u32 = 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/asistente/conversaciones", get(listar).post(crear))
        .route("/asistente/conversaciones/:id", delete(archivar))
        .route(
            "/asistente/conversaciones/:id/mensajes",
            get(mensajes).post(conversar),
        )
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let conversaciones = blocking(&state.conn, move |conn| {
        use crate::shared::schema::conversaciones_asistente::dsl as ca;
        ca::conversaciones_asistente
            .filter(ca::tenant_id.eq(tenant_id))
            .filter(ca::usuario_id.eq(usuario_id))
            .filter(ca::activa.eq(true))
            .order(ca::updated_at.desc())
            .select(ConversacionAsistente::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(conversaciones))
}

#[derive(Debug, Deserialize)]
struct CrearConversacionRequest {
    titulo: Option<String>,
}

/// Crea una conversacion. Un usuario mantiene a lo sumo 10 activas: al
/// crear la numero 11 se desactiva la mas antigua, en la misma
/// transaccion que el insert.
async fn crear(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CrearConversacionRequest>,
) -> Result<axum::response::Response, AppError> {
    let titulo = body
        .titulo
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Nueva conversacion".to_string());

    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let conversacion = blocking(&state.conn, move |conn| {
        use crate::shared::schema::conversaciones_asistente::dsl as ca;

        planes::validar_funcionalidad(conn, tenant_id, "ia_interna", |u| u.tiene_ia_interna)?;

        conn.transaction::<ConversacionAsistente, AppError, _>(|conn| {
            let activas: i64 = ca::conversaciones_asistente
                .filter(ca::tenant_id.eq(tenant_id))
                .filter(ca::usuario_id.eq(usuario_id))
                .filter(ca::activa.eq(true))
                .count()
                .get_result(conn)?;

            if activas >= MAX_CONVERSACIONES_ACTIVAS {
                let mas_antigua: Option<Uuid> = ca::conversaciones_asistente
                    .filter(ca::tenant_id.eq(tenant_id))
                    .filter(ca::usuario_id.eq(usuario_id))
                    .filter(ca::activa.eq(true))
                    .order(ca::created_at.asc())
                    .select(ca::id)
                    .first(conn)
                    .optional()?;
                if let Some(id) = mas_antigua {
                    diesel::update(ca::conversaciones_asistente.filter(ca::id.eq(id)))
                        .set((ca::activa.eq(false), ca::updated_at.eq(Utc::now())))
                        .execute(conn)?;
                    info!("conversacion {} desplazada por la nueva", id);
                }
            }

            let id = Uuid::new_v4();
            diesel::insert_into(ca::conversaciones_asistente)
                .values((
                    ca::id.eq(id),
                    ca::tenant_id.eq(tenant_id),
                    ca::usuario_id.eq(usuario_id),
                    ca::titulo.eq(titulo),
                    ca::total_mensajes.eq(0),
                    ca::tokens_entrada.eq(0i64),
                    ca::tokens_salida.eq(0i64),
                    ca::activa.eq(true),
                    ca::fecha_expiracion.eq(Utc::now() + chrono::Duration::days(DIAS_EXPIRACION)),
                ))
                .execute(conn)?;

            ca::conversaciones_asistente
                .filter(ca::id.eq(id))
                .select(ConversacionAsistente::as_select())
                .first(conn)
                .map_err(AppError::from)
        })
    })
    .await?;

    Ok(created(conversacion))
}

fn cargar_conversacion(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    usuario_id: Uuid,
    conversacion_id: Uuid,
) -> Result<ConversacionAsistente, AppError> {
    use crate::shared::schema::conversaciones_asistente::dsl as ca;
    ca::conversaciones_asistente
        .filter(ca::id.eq(conversacion_id))
        .filter(ca::tenant_id.eq(tenant_id))
        .filter(ca::usuario_id.eq(usuario_id))
        .select(ConversacionAsistente::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("conversacion no encontrada".into()))
}

async fn mensajes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversacion_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let mensajes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::mensajes_asistente::dsl as ma;
        cargar_conversacion(conn, tenant_id, usuario_id, conversacion_id)?;
        ma::mensajes_asistente
            .filter(ma::conversacion_id.eq(conversacion_id))
            .order(ma::created_at.asc())
            .select(MensajeAsistente::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(mensajes))
}

#[derive(Debug, Deserialize)]
struct ConversarRequest {
    contenido: String,
}

/// El asistente del panel trabaja con el contexto de la cuenta: empresa,
/// plan y carga de reclamos del momento.
fn prompt_sistema(tenant: &Tenant, uso: &UsoTenant, pendientes: i64, en_proceso: i64) -> String {
    format!(
        "Eres el asistente interno del panel de administracion del Libro de \
         Reclamaciones de {razon} (RUC {ruc}). Ayudas al personal de la empresa \
         a redactar respuestas a reclamos, resumir casos y entender metricas. \
         Responde en espanol, claro y conciso.\n\n\
         Contexto de la cuenta:\n\
         - Plan: {plan}\n\
         - Plazo legal de respuesta: {plazo} dias calendario\n\
         - Sedes activas: {sedes}\n\
         - Reclamos pendientes: {pendientes}\n\
         - Reclamos en proceso: {en_proceso}",
        razon = tenant.razon_social,
        ruc = tenant.ruc,
        plan = uso.plan_nombre.as_deref().unwrap_or("sin plan"),
        plazo = tenant.plazo_respuesta_dias,
        sedes = uso.sedes_actuales,
        pendientes = pendientes,
        en_proceso = en_proceso,
    )
}

async fn conversar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversacion_id): Path<Uuid>,
    Json(body): Json<ConversarRequest>,
) -> Result<axum::response::Response, AppError> {
    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }

    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;

    // Validacion, historial y contexto del tenant en una pasada.
    let contenido_db = contenido.clone();
    let (historial, tenant, uso, pendientes, en_proceso) =
        blocking(&state.conn, move |conn| {
            use crate::shared::schema::configuracion_tenant::dsl as t;
            use crate::shared::schema::mensajes_asistente::dsl as ma;
            use crate::shared::schema::reclamos::dsl as r;

            let uso =
                planes::validar_funcionalidad(conn, tenant_id, "ia_interna", |u| u.tiene_ia_interna)?;
            let conversacion = cargar_conversacion(conn, tenant_id, usuario_id, conversacion_id)?;
            if !conversacion.activa {
                return Err(AppError::Conflict("la conversacion fue archivada".into()));
            }
            if conversacion.fecha_expiracion < Utc::now() {
                return Err(AppError::Conflict("la conversacion expiro".into()));
            }
            let total: i64 = ma::mensajes_asistente
                .filter(ma::conversacion_id.eq(conversacion_id))
                .count()
                .get_result(conn)?;
            if total >= MAX_MENSAJES_POR_CONVERSACION {
                return Err(AppError::Conflict(
                    "la conversacion alcanzo el maximo de 50 mensajes; crea una nueva".into(),
                ));
            }

            let tenant = t::configuracion_tenant
                .filter(t::id.eq(tenant_id))
                .select(Tenant::as_select())
                .first(conn)?;
            let pendientes: i64 = r::reclamos
                .filter(r::tenant_id.eq(tenant_id))
                .filter(r::deleted_at.is_null())
                .filter(r::estado.eq(estado_reclamo::PENDIENTE))
                .count()
                .get_result(conn)?;
            let en_proceso: i64 = r::reclamos
                .filter(r::tenant_id.eq(tenant_id))
                .filter(r::deleted_at.is_null())
                .filter(r::estado.eq(estado_reclamo::EN_PROCESO))
                .count()
                .get_result(conn)?;

            let historial = ma::mensajes_asistente
                .filter(ma::conversacion_id.eq(conversacion_id))
                .order(ma::created_at.asc())
                .select(MensajeAsistente::as_select())
                .load(conn)?;
            Ok((historial, tenant, uso, pendientes, en_proceso))
        })
        .await?;

    let mut turnos: Vec<ChatMessage> = historial
        .iter()
        .map(|m| ChatMessage {
            role: m.rol.clone(),
            content: m.contenido.clone(),
        })
        .collect();
    turnos.push(ChatMessage::user(contenido_db.clone()));

    let peticion = ChatRequest {
        system: prompt_sistema(&tenant, &uso, pendientes, en_proceso),
        messages: turnos,
        max_tokens: MAX_TOKENS_RESPUESTA,
    };

    let respuesta = tokio::time::timeout(TIMEOUT_CHAT, state.llm.chat(&peticion))
        .await
        .map_err(|_| AppError::Internal(anyhow::anyhow!("el proveedor de IA excedio 120s")))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("proveedor de IA: {e}")))?;

    // Persistencia del turno completo y expiracion deslizante de 7 dias.
    let texto_ia = respuesta.text.clone();
    let entrada = respuesta.input_tokens;
    let salida = respuesta.output_tokens;
    let mensaje_ia = blocking(&state.conn, move |conn| {
        use crate::shared::schema::conversaciones_asistente::dsl as ca;
        use crate::shared::schema::mensajes_asistente::dsl as ma;

        conn.transaction::<MensajeAsistente, AppError, _>(|conn| {
            diesel::insert_into(ma::mensajes_asistente)
                .values((
                    ma::id.eq(Uuid::new_v4()),
                    ma::conversacion_id.eq(conversacion_id),
                    ma::rol.eq("user"),
                    ma::contenido.eq(&contenido_db),
                    ma::tokens.eq(Some(entrada as i32)),
                ))
                .execute(conn)?;

            let id_respuesta = Uuid::new_v4();
            diesel::insert_into(ma::mensajes_asistente)
                .values((
                    ma::id.eq(id_respuesta),
                    ma::conversacion_id.eq(conversacion_id),
                    ma::rol.eq("assistant"),
                    ma::contenido.eq(&texto_ia),
                    ma::tokens.eq(Some(salida as i32)),
                ))
                .execute(conn)?;

            diesel::update(ca::conversaciones_asistente.filter(ca::id.eq(conversacion_id)))
                .set((
                    ca::total_mensajes.eq(ca::total_mensajes + 2),
                    ca::tokens_entrada.eq(ca::tokens_entrada + entrada),
                    ca::tokens_salida.eq(ca::tokens_salida + salida),
                    ca::fecha_expiracion
                        .eq(Utc::now() + chrono::Duration::days(DIAS_EXPIRACION)),
                    ca::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            ma::mensajes_asistente
                .filter(ma::id.eq(id_respuesta))
                .select(MensajeAsistente::as_select())
                .first(conn)
                .map_err(AppError::from)
        })
    })
    .await?;

    Ok(ok(json!({
        "mensaje": mensaje_ia,
        "proveedor": respuesta.provider,
        "tokens": { "entrada": entrada, "salida": salida },
    })))
}

async fn archivar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversacion_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::conversaciones_asistente::dsl as ca;
        cargar_conversacion(conn, tenant_id, usuario_id, conversacion_id)?;
        diesel::update(ca::conversaciones_asistente.filter(ca::id.eq(conversacion_id)))
            .set((ca::activa.eq(false), ca::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tenant_demo() -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            razon_social: "Pollos El Rey".into(),
            ruc: "20123456789".into(),
            slug: "pollos-el-rey".into(),
            direccion_legal: None,
            sitio_web: None,
            email_contacto: None,
            telefono_contacto: None,
            color_primario: None,
            logo_url: None,
            logo_base64: None,
            plazo_respuesta_dias: 15,
            notificar_email: true,
            notificar_cliente: true,
            activo: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn uso_demo() -> UsoTenant {
        UsoTenant {
            tenant_id: Uuid::new_v4(),
            plan_id: Some(Uuid::new_v4()),
            plan_nombre: Some("Emprende".into()),
            suscripcion_estado: Some("ACTIVE".into()),
            limite_sedes: 3,
            limite_usuarios: 5,
            limite_reclamos_mes: 50,
            limite_chatbots: 1,
            limite_canales_whatsapp: 1,
            limite_storage_mb: 512,
            tiene_chatbot: true,
            tiene_whatsapp: false,
            tiene_email: true,
            tiene_reportes_pdf: false,
            tiene_export_excel: false,
            tiene_api: false,
            tiene_white_label: false,
            tiene_multi_idioma: false,
            tiene_ia_interna: true,
            tiene_asesor_en_vivo: false,
            sedes_actuales: 2,
            usuarios_actuales: 3,
            reclamos_mes_actual: 12,
            chatbots_actuales: 0,
            canales_whatsapp_actuales: 0,
        }
    }

    #[test]
    fn prompt_lleva_datos_de_la_cuenta() {
        let prompt = prompt_sistema(&tenant_demo(), &uso_demo(), 4, 2);
        assert!(prompt.contains("Pollos El Rey"));
        assert!(prompt.contains("RUC 20123456789"));
        assert!(prompt.contains("Plan: Emprende"));
        assert!(prompt.contains("15 dias"));
        assert!(prompt.contains("Sedes activas: 2"));
        assert!(prompt.contains("Reclamos pendientes: 4"));
        assert!(prompt.contains("Reclamos en proceso: 2"));
    }

    #[test]
    fn prompt_sin_plan_no_revienta() {
        let mut uso = uso_demo();
        uso.plan_nombre = None;
        let prompt = prompt_sistema(&tenant_demo(), &uso, 0, 0);
        assert!(prompt.contains("Plan: sin plan"));
    }
}
