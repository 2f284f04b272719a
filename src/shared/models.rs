use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::*;

// Estados y discriminantes se guardan como texto plano; estos módulos son
// la única fuente de los literales.

pub mod estado_reclamo {
    pub const PENDIENTE: &str = "PENDIENTE";
    pub const EN_PROCESO: &str = "EN_PROCESO";
    pub const RESUELTO: &str = "RESUELTO";
    pub const CERRADO: &str = "CERRADO";
    pub const RECHAZADO: &str = "RECHAZADO";

    pub const TODOS: [&str; 5] = [PENDIENTE, EN_PROCESO, RESUELTO, CERRADO, RECHAZADO];

    /// Valid transitions of the complaint state machine. `CERRADO|RECHAZADO
    /// -> EN_PROCESO` is the reopen path.
    pub fn transicion_valida(desde: &str, hacia: &str) -> bool {
        matches!(
            (desde, hacia),
            (PENDIENTE, EN_PROCESO)
                | (PENDIENTE, RESUELTO)
                | (PENDIENTE, RECHAZADO)
                | (EN_PROCESO, RESUELTO)
                | (RESUELTO, CERRADO)
                | (CERRADO, EN_PROCESO)
                | (RECHAZADO, EN_PROCESO)
        )
    }

    pub fn emoji(estado: &str) -> &'static str {
        match estado {
            PENDIENTE => "🕐",
            EN_PROCESO => "🔄",
            RESUELTO => "✅",
            CERRADO => "📁",
            RECHAZADO => "❌",
            _ => "",
        }
    }
}

pub mod tipo_reclamo {
    pub const RECLAMO: &str = "RECLAMO";
    pub const QUEJA: &str = "QUEJA";

    pub fn es_valido(t: &str) -> bool {
        t == RECLAMO || t == QUEJA
    }
}

pub mod canal_origen {
    pub const WEB: &str = "WEB";
    pub const WHATSAPP: &str = "WHATSAPP";
    pub const PRESENCIAL: &str = "PRESENCIAL";
    pub const API: &str = "API";
}

pub mod tipo_accion {
    pub const CREACION: &str = "CREACION";
    pub const CAMBIO_ESTADO: &str = "CAMBIO_ESTADO";
    pub const RESPUESTA: &str = "RESPUESTA";
    pub const ASIGNACION: &str = "ASIGNACION";
    pub const NOTIFICACION: &str = "NOTIFICACION";
    pub const REAPERTURA: &str = "REAPERTURA";
    pub const CHATBOT_RESPUESTA: &str = "CHATBOT_RESPUESTA";
}

pub mod rol_usuario {
    pub const ADMIN: &str = "ADMIN";
    pub const SOPORTE: &str = "SOPORTE";

    pub fn es_valido(r: &str) -> bool {
        r == ADMIN || r == SOPORTE
    }
}

pub mod estado_suscripcion {
    pub const TRIAL: &str = "TRIAL";
    pub const ACTIVE: &str = "ACTIVE";
    pub const SUSPENDED: &str = "SUSPENDED";
    pub const CANCELLED: &str = "CANCELLED";
    pub const EXPIRED: &str = "EXPIRED";

    pub fn es_vigente(e: &str) -> bool {
        e == TRIAL || e == ACTIVE
    }
}

pub mod estado_solicitud {
    pub const PENDIENTE: &str = "PENDIENTE";
    pub const EN_ATENCION: &str = "EN_ATENCION";
    pub const RESUELTO: &str = "RESUELTO";
    pub const CANCELADO: &str = "CANCELADO";

    pub fn es_abierta(e: &str) -> bool {
        e == PENDIENTE || e == EN_ATENCION
    }
}

pub mod prioridad_solicitud {
    pub const BAJA: &str = "BAJA";
    pub const NORMAL: &str = "NORMAL";
    pub const ALTA: &str = "ALTA";
    pub const URGENTE: &str = "URGENTE";

    /// Panel ordering weight; higher attends first.
    pub fn peso(p: &str) -> i32 {
        match p {
            URGENTE => 4,
            ALTA => 3,
            NORMAL => 2,
            BAJA => 1,
            _ => 0,
        }
    }

    pub fn es_valida(p: &str) -> bool {
        matches!(p, BAJA | NORMAL | ALTA | URGENTE)
    }
}

pub mod remitente {
    pub const CLIENTE: &str = "CLIENTE";
    pub const EMPRESA: &str = "EMPRESA";
    pub const CHATBOT: &str = "CHATBOT";
    pub const ASESOR: &str = "ASESOR";
    pub const SISTEMA: &str = "SISTEMA";
}

pub mod tipo_chatbot {
    pub const ASISTENTE_IA: &str = "ASISTENTE_IA";
    pub const WHATSAPP_BOT: &str = "WHATSAPP_BOT";
    pub const TELEGRAM_BOT: &str = "TELEGRAM_BOT";
    pub const CUSTOM: &str = "CUSTOM";

    pub fn es_valido(t: &str) -> bool {
        matches!(t, ASISTENTE_IA | WHATSAPP_BOT | TELEGRAM_BOT | CUSTOM)
    }
}

pub mod entorno_api_key {
    pub const LIVE: &str = "LIVE";
    pub const TEST: &str = "TEST";
}

pub mod tipo_documento {
    pub const DNI: &str = "DNI";
    pub const CE: &str = "CE";
    pub const PASAPORTE: &str = "Pasaporte";
    pub const RUC: &str = "RUC";

    /// Normalises free-form model/user output to a known document type.
    pub fn normalizar(t: &str) -> &'static str {
        match t.trim().to_uppercase().as_str() {
            "DNI" => DNI,
            "CE" | "CARNET DE EXTRANJERIA" | "CARNET" => CE,
            "PASAPORTE" | "PASSPORT" => PASAPORTE,
            "RUC" => RUC,
            _ => DNI,
        }
    }
}

// ---------------------------------------------------------------------------
// Tenant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = configuracion_tenant)]
pub struct Tenant {
    pub id: Uuid,
    pub razon_social: String,
    pub ruc: String,
    pub slug: String,
    pub direccion_legal: Option<String>,
    pub sitio_web: Option<String>,
    pub email_contacto: Option<String>,
    pub telefono_contacto: Option<String>,
    pub color_primario: Option<String>,
    pub logo_url: Option<String>,
    pub logo_base64: Option<String>,
    pub plazo_respuesta_dias: i32,
    pub notificar_email: bool,
    pub notificar_cliente: bool,
    pub activo: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, AsChangeset, Deserialize)]
#[diesel(table_name = configuracion_tenant)]
pub struct TenantUpdate {
    pub razon_social: Option<String>,
    pub direccion_legal: Option<String>,
    pub sitio_web: Option<String>,
    pub email_contacto: Option<String>,
    pub telefono_contacto: Option<String>,
    pub color_primario: Option<String>,
    pub logo_url: Option<String>,
    pub logo_base64: Option<String>,
    pub plazo_respuesta_dias: Option<i32>,
    pub notificar_email: Option<bool>,
    pub notificar_cliente: Option<bool>,
}

// ---------------------------------------------------------------------------
// Planes y suscripciones
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = planes)]
pub struct Plan {
    pub id: Uuid,
    pub nombre: String,
    pub codigo: String,
    pub precio_mensual: Option<f64>,
    pub limite_sedes: i32,
    pub limite_usuarios: i32,
    pub limite_reclamos_mes: i32,
    pub limite_chatbots: i32,
    pub limite_canales_whatsapp: i32,
    pub limite_storage_mb: i32,
    pub tiene_chatbot: bool,
    pub tiene_whatsapp: bool,
    pub tiene_email: bool,
    pub tiene_reportes_pdf: bool,
    pub tiene_export_excel: bool,
    pub tiene_api: bool,
    pub tiene_white_label: bool,
    pub tiene_multi_idioma: bool,
    pub tiene_ia_interna: bool,
    pub tiene_asesor_en_vivo: bool,
    pub activo: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = suscripciones)]
pub struct Suscripcion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub estado: String,
    pub ciclo: String,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: Option<DateTime<Utc>>,
    pub trial_hasta: Option<DateTime<Utc>>,
    pub override_sedes: Option<i32>,
    pub override_usuarios: Option<i32>,
    pub override_reclamos_mes: Option<i32>,
    pub override_chatbots: Option<i32>,
    pub override_canales_whatsapp: Option<i32>,
    pub override_storage_mb: Option<i32>,
    pub fecha_proximo_cargo: Option<DateTime<Utc>>,
    pub referencia_pago: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `v_uso_tenant`: effective limits (override ?? plan), feature
/// flags and live usage counters. The only authority for quota decisions.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = v_uso_tenant)]
pub struct UsoTenant {
    pub tenant_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub plan_nombre: Option<String>,
    pub suscripcion_estado: Option<String>,
    pub limite_sedes: i32,
    pub limite_usuarios: i32,
    pub limite_reclamos_mes: i32,
    pub limite_chatbots: i32,
    pub limite_canales_whatsapp: i32,
    pub limite_storage_mb: i32,
    pub tiene_chatbot: bool,
    pub tiene_whatsapp: bool,
    pub tiene_email: bool,
    pub tiene_reportes_pdf: bool,
    pub tiene_export_excel: bool,
    pub tiene_api: bool,
    pub tiene_white_label: bool,
    pub tiene_multi_idioma: bool,
    pub tiene_ia_interna: bool,
    pub tiene_asesor_en_vivo: bool,
    pub sedes_actuales: i64,
    pub usuarios_actuales: i64,
    pub reclamos_mes_actual: i64,
    pub chatbots_actuales: i64,
    pub canales_whatsapp_actuales: i64,
}

// ---------------------------------------------------------------------------
// Sedes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = sedes)]
pub struct Sede {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre: String,
    pub slug: String,
    pub direccion: String,
    pub latitud: Option<f64>,
    pub longitud: Option<f64>,
    pub horario_atencion: Option<serde_json::Value>,
    pub es_principal: bool,
    pub activo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sedes)]
pub struct NuevaSede {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre: String,
    pub slug: String,
    pub direccion: String,
    pub latitud: Option<f64>,
    pub longitud: Option<f64>,
    pub horario_atencion: Option<serde_json::Value>,
    pub es_principal: bool,
    pub activo: bool,
}

// ---------------------------------------------------------------------------
// Usuarios y sesiones
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = usuarios_admin)]
pub struct UsuarioAdmin {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre_completo: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub rol: String,
    pub sede_id: Option<Uuid>,
    pub activo: bool,
    pub ultimo_acceso: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = usuarios_admin)]
pub struct NuevoUsuarioAdmin {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre_completo: String,
    pub email: String,
    pub password_hash: String,
    pub rol: String,
    pub sede_id: Option<Uuid>,
    pub activo: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sesiones)]
pub struct NuevaSesion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub usuario_id: Uuid,
    pub token_hash: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expira_en: DateTime<Utc>,
    pub activa: bool,
}

// ---------------------------------------------------------------------------
// Chatbots y API keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = chatbots)]
pub struct Chatbot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre: String,
    pub tipo: String,
    pub puede_leer_reclamos: bool,
    pub puede_responder: bool,
    pub puede_cambiar_estado: bool,
    pub puede_enviar_mensajes: bool,
    pub puede_leer_metricas: bool,
    pub activo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = api_keys)]
pub struct ApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub chatbot_id: Uuid,
    pub prefijo: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub entorno: String,
    pub expira_en: Option<DateTime<Utc>>,
    pub activa: bool,
    pub ultimo_uso: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reclamos
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = reclamos)]
pub struct Reclamo {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sede_id: Option<Uuid>,
    pub codigo: String,
    pub tipo: String,
    pub estado: String,
    pub canal_origen: String,
    pub razon_social_proveedor: String,
    pub ruc_proveedor: String,
    pub direccion_proveedor: Option<String>,
    pub sede_nombre: Option<String>,
    pub sede_direccion: Option<String>,
    pub nombre_completo: String,
    pub tipo_documento: String,
    pub numero_documento: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub es_menor_edad: bool,
    pub nombre_apoderado: Option<String>,
    pub descripcion_bien: Option<String>,
    pub monto_reclamado: Option<f64>,
    pub descripcion: String,
    pub pedido_consumidor: String,
    pub fecha_incidente: NaiveDate,
    pub fecha_registro: DateTime<Utc>,
    pub fecha_limite_respuesta: DateTime<Utc>,
    pub fecha_respuesta: Option<DateTime<Utc>>,
    pub fecha_cierre: Option<DateTime<Utc>>,
    pub atendido_por: Option<Uuid>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reclamos)]
pub struct NuevoReclamo {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sede_id: Option<Uuid>,
    pub codigo: String,
    pub tipo: String,
    pub estado: String,
    pub canal_origen: String,
    pub razon_social_proveedor: String,
    pub ruc_proveedor: String,
    pub direccion_proveedor: Option<String>,
    pub sede_nombre: Option<String>,
    pub sede_direccion: Option<String>,
    pub nombre_completo: String,
    pub tipo_documento: String,
    pub numero_documento: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub es_menor_edad: bool,
    pub nombre_apoderado: Option<String>,
    pub descripcion_bien: Option<String>,
    pub monto_reclamado: Option<f64>,
    pub descripcion: String,
    pub pedido_consumidor: String,
    pub fecha_incidente: NaiveDate,
    pub fecha_registro: DateTime<Utc>,
    pub fecha_limite_respuesta: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = reclamo_mensajes)]
pub struct ReclamoMensaje {
    pub id: Uuid,
    pub reclamo_id: Uuid,
    pub tenant_id: Uuid,
    pub remitente: String,
    pub contenido: String,
    pub leido: bool,
    pub leido_en: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = reclamo_respuestas)]
pub struct ReclamoRespuesta {
    pub id: Uuid,
    pub reclamo_id: Uuid,
    pub tenant_id: Uuid,
    pub usuario_id: Option<Uuid>,
    pub contenido: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = reclamo_historial)]
pub struct HistorialEvento {
    pub id: Uuid,
    pub reclamo_id: Uuid,
    pub tenant_id: Uuid,
    pub estado_anterior: Option<String>,
    pub estado_nuevo: Option<String>,
    pub tipo_accion: String,
    pub comentario: Option<String>,
    pub usuario_id: Option<Uuid>,
    pub chatbot_id: Option<Uuid>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = reclamo_historial)]
pub struct NuevoHistorialEvento {
    pub id: Uuid,
    pub reclamo_id: Uuid,
    pub tenant_id: Uuid,
    pub estado_anterior: Option<String>,
    pub estado_nuevo: Option<String>,
    pub tipo_accion: String,
    pub comentario: Option<String>,
    pub usuario_id: Option<Uuid>,
    pub chatbot_id: Option<Uuid>,
    pub ip: Option<String>,
}

// ---------------------------------------------------------------------------
// WhatsApp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = canales_whatsapp)]
pub struct CanalWhatsApp {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre: String,
    pub phone_number_id: String,
    pub display_phone: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub verify_token: String,
    pub chatbot_id: Option<Uuid>,
    pub activo: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Atención con asesor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = solicitudes_asesor)]
pub struct SolicitudAsesor {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nombre_cliente: String,
    pub telefono: String,
    pub motivo: Option<String>,
    pub canal_origen: String,
    pub canal_whatsapp_id: Option<Uuid>,
    pub estado: String,
    pub prioridad: String,
    pub asignado_a: Option<Uuid>,
    pub fecha_asignacion: Option<DateTime<Utc>>,
    pub fecha_resolucion: Option<DateTime<Utc>>,
    pub nota_interna: Option<String>,
    pub resumen_conversacion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = mensajes_atencion)]
pub struct MensajeAtencion {
    pub id: Uuid,
    pub solicitud_id: Uuid,
    pub tenant_id: Uuid,
    pub remitente: String,
    pub contenido: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Asistente del panel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = conversaciones_asistente)]
pub struct ConversacionAsistente {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub usuario_id: Uuid,
    pub titulo: String,
    pub total_mensajes: i32,
    pub tokens_entrada: i64,
    pub tokens_salida: i64,
    pub activa: bool,
    pub fecha_expiracion: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = mensajes_asistente)]
pub struct MensajeAsistente {
    pub id: Uuid,
    pub conversacion_id: Uuid,
    pub rol: String,
    pub contenido: String,
    pub tokens: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transiciones_de_estado() {
        use estado_reclamo::*;
        assert!(transicion_valida(PENDIENTE, EN_PROCESO));
        assert!(transicion_valida(PENDIENTE, RECHAZADO));
        assert!(transicion_valida(EN_PROCESO, RESUELTO));
        assert!(transicion_valida(RESUELTO, CERRADO));
        assert!(!transicion_valida(CERRADO, RESUELTO));
        assert!(!transicion_valida(RESUELTO, PENDIENTE));
        // Reapertura
        assert!(transicion_valida(CERRADO, EN_PROCESO));
        assert!(transicion_valida(RECHAZADO, EN_PROCESO));
    }

    #[test]
    fn normaliza_tipo_documento() {
        assert_eq!(tipo_documento::normalizar("dni"), "DNI");
        assert_eq!(tipo_documento::normalizar("pasaporte"), "Pasaporte");
        assert_eq!(tipo_documento::normalizar("ce"), "CE");
        assert_eq!(tipo_documento::normalizar("otra cosa"), "DNI");
    }

    #[test]
    fn prioridad_ordena_urgente_primero() {
        use prioridad_solicitud::*;
        assert!(peso(URGENTE) > peso(ALTA));
        assert!(peso(ALTA) > peso(NORMAL));
        assert!(peso(NORMAL) > peso(BAJA));
    }

    #[test]
    fn solicitud_abierta() {
        assert!(estado_solicitud::es_abierta(estado_solicitud::PENDIENTE));
        assert!(estado_solicitud::es_abierta(estado_solicitud::EN_ATENCION));
        assert!(!estado_solicitud::es_abierta(estado_solicitud::RESUELTO));
        assert!(!estado_solicitud::es_abierta(estado_solicitud::CANCELADO));
    }
}
