use chrono::{Datelike, Utc};
use diesel::prelude::*;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use super::memoria::MemoriaConversaciones;
use crate::asesores;
use crate::llm::{ChatMessage, ChatRequest};
use crate::reclamos::publico::{self, CrearReclamoRequest};
use crate::shared::errors::AppError;
use crate::shared::models::{
    canal_origen, estado_reclamo, remitente, tipo_reclamo, CanalWhatsApp, Reclamo, Tenant,
};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

const MAX_ENTRADA: usize = 700;
const MAX_TOKENS_RESPUESTA: u32 = 600;

const MARCADOR_INICIO: &str = ">>>REGISTRAR_RECLAMO:";
const MARCADOR_FIN: &str = "<<<";

const MSG_MUY_LARGO: &str =
    "Tu mensaje es demasiado largo. Por favor resumelo en menos de 700 caracteres. 🙏";
const MSG_NO_PROCESADO: &str =
    "No pude procesar el registro. Por favor confirma nuevamente tus datos.";
const MSG_DATOS_INCOMPLETOS: &str =
    "Faltan datos para registrar tu reclamo. Por favor confirma tu nombre, documento, email y la descripcion del problema.";
const MSG_LIMITE_PLAN: &str =
    "La empresa alcanzo el limite de reclamos de su plan este mes. Por favor intenta registrarlo desde el libro de reclamaciones web.";
const MSG_ERROR_REGISTRO: &str =
    "Ocurrio un error al registrar tu reclamo. Por favor intentalo nuevamente en unos minutos.";

// Codigos tipo 2024-ACME-XXXXXX de anios recientes, o el prefijo historico REC-.
static RE_CODIGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:REC-|20\d{2}-)[A-Z0-9][A-Z0-9-]{3,})\b").unwrap());

/// Turno completo de conversacion. `None` significa que no hay nada que
/// responder (por ejemplo durante la atencion humana).
pub async fn procesar(
    state: &AppState,
    canal: &CanalWhatsApp,
    from: &str,
    texto: &str,
) -> Option<String> {
    let limpio = texto.trim().to_string();
    if limpio.chars().count() > MAX_ENTRADA {
        return Some(MSG_MUY_LARGO.to_string());
    }

    let tenant = match cargar_tenant(state, canal.tenant_id).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            warn!("canal {} apunta a un tenant inactivo", canal.id);
            return None;
        }
        Err(e) => {
            error!("no se pudo cargar el tenant del canal {}: {}", canal.id, e);
            return None;
        }
    };

    // Atencion humana en curso: el turno va a la cola del asesor, no a la IA.
    match guardar_mensaje_cliente(state, tenant.id, from, &limpio).await {
        Ok(true) => return None,
        Ok(false) => {}
        Err(e) => error!("fallo la consulta de atencion para {}: {}", from, e),
    }

    // Camino rapido determinista: consulta de estado por codigo.
    if let Some(codigo) = detectar_codigo(&limpio) {
        let respuesta = consultar_estado(state, &tenant, &codigo).await;
        state.memoria.registrar_turno(
            from,
            tenant.id,
            ChatMessage::user(limpio),
            Some(ChatMessage::assistant(respuesta.clone())),
        );
        return Some(respuesta);
    }

    // Pedido explicito de un asesor humano, sin pasar por la IA.
    if pide_asesor(&limpio) {
        let respuesta = solicitar_asesor(state, &tenant, canal, from).await;
        state.memoria.registrar_turno(
            from,
            tenant.id,
            ChatMessage::user(limpio),
            Some(ChatMessage::assistant(respuesta.clone())),
        );
        return Some(respuesta);
    }

    // Camino IA.
    let mut mensajes = state.memoria.historial(from);
    mensajes.push(ChatMessage::user(limpio.clone()));

    let peticion = ChatRequest {
        system: prompt_sistema(&tenant),
        messages: mensajes,
        max_tokens: MAX_TOKENS_RESPUESTA,
    };

    let texto_ia = match state.llm.chat(&peticion).await {
        Ok(r) => r.text,
        Err(e) => {
            warn!("gateway de IA fallo para {}: {}", from, e);
            let respuesta = respuesta_enlatada(&limpio, &tenant);
            state.memoria.registrar_turno(
                from,
                tenant.id,
                ChatMessage::user(limpio),
                Some(ChatMessage::assistant(respuesta.clone())),
            );
            return Some(respuesta);
        }
    };

    if texto_ia.contains(MARCADOR_INICIO) {
        return Some(registrar_desde_marcador(state, &tenant, from, &limpio, &texto_ia).await);
    }

    let respuesta = limpiar_markdown(&texto_ia);
    state.memoria.registrar_turno(
        from,
        tenant.id,
        ChatMessage::user(limpio),
        Some(ChatMessage::assistant(respuesta.clone())),
    );
    Some(respuesta)
}

async fn cargar_tenant(state: &AppState, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;
        t::configuracion_tenant
            .filter(t::id.eq(tenant_id))
            .filter(t::activo.eq(true))
            .select(Tenant::as_select())
            .first(conn)
            .optional()
            .map_err(AppError::from)
    })
    .await
}

pub(super) fn detectar_codigo(texto: &str) -> Option<String> {
    let mayusculas = texto.to_uppercase();
    RE_CODIGO
        .captures(&mayusculas)
        .map(|c| c[1].trim_end_matches('-').to_string())
}

async fn consultar_estado(state: &AppState, tenant: &Tenant, codigo: &str) -> String {
    let tenant_id = tenant.id;
    let codigo_q = codigo.to_string();
    let reclamo = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamos::dsl as r;
        r::reclamos
            .filter(r::tenant_id.eq(tenant_id))
            .filter(r::codigo.eq(&codigo_q))
            .filter(r::deleted_at.is_null())
            .select(Reclamo::as_select())
            .first(conn)
            .optional()
            .map_err(AppError::from)
    })
    .await;

    match reclamo {
        Ok(Some(reclamo)) => {
            let descripcion: String = reclamo.descripcion.chars().take(200).collect();
            let mut cuerpo = format!(
                "*Estado de tu reclamo*\n\n\
                 Codigo: {}\n\
                 Estado: {} {}\n\
                 Registrado: {}\n\
                 Fecha limite de respuesta: {}\n",
                reclamo.codigo,
                estado_reclamo::emoji(&reclamo.estado),
                reclamo.estado,
                reclamo.fecha_registro.format("%d/%m/%Y"),
                reclamo.fecha_limite_respuesta.format("%d/%m/%Y"),
            );
            if let Some(fecha) = reclamo.fecha_respuesta {
                cuerpo.push_str(&format!("Respondido: {}\n", fecha.format("%d/%m/%Y")));
            }
            cuerpo.push_str(&format!("\nDescripcion: {}", descripcion));
            cuerpo
        }
        Ok(None) => format!(
            "No encontre ningun reclamo con el codigo *{}* en {}. Verifica el codigo e intenta de nuevo.",
            codigo, tenant.razon_social
        ),
        Err(e) => {
            error!("fallo la consulta del codigo {}: {}", codigo, e);
            MSG_ERROR_REGISTRO.to_string()
        }
    }
}

fn pide_asesor(texto: &str) -> bool {
    let t = texto.to_lowercase();
    ["asesor", "humano", "una persona", "agente", "hablar con alguien"]
        .iter()
        .any(|p| t.contains(p))
}

async fn solicitar_asesor(
    state: &AppState,
    tenant: &Tenant,
    canal: &CanalWhatsApp,
    from: &str,
) -> String {
    let resumen = state
        .memoria
        .historial(from)
        .iter()
        .rev()
        .take(6)
        .rev()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let tenant_id = tenant.id;
    let canal_id = canal.id;
    let telefono = from.to_string();
    let resultado = blocking(&state.conn, move |conn| {
        asesores::crear_solicitud(
            conn,
            tenant_id,
            &telefono,
            &telefono,
            Some("Solicitado desde WhatsApp".into()),
            Some(canal_id),
            if resumen.is_empty() { None } else { Some(resumen) },
        )
    })
    .await;

    match resultado {
        Ok(solicitud) => {
            info!("solicitud de asesor {} creada desde whatsapp", solicitud.id);
            "Listo, pedi que un asesor te atienda. 💬 Te escribira por este mismo chat en cuanto tome tu caso."
                .to_string()
        }
        Err(AppError::LimiteSolicitudes) => {
            "Ya tienes varias solicitudes de atencion abiertas. Un asesor te contactara pronto."
                .to_string()
        }
        Err(e) => {
            error!("no se pudo crear la solicitud de asesor: {}", e);
            MSG_ERROR_REGISTRO.to_string()
        }
    }
}

fn prompt_sistema(tenant: &Tenant) -> String {
    format!(
        "Eres el asistente virtual del Libro de Reclamaciones de {razon} (RUC {ruc}).\n\
         Solo atiendes temas relacionados con reclamos y quejas de esta empresa.\n\n\
         Datos de la empresa:\n\
         - Sitio web: {web}\n\
         - Email de contacto: {email}\n\
         - Telefono: {fono}\n\
         - Plazo legal de respuesta: {plazo} dias calendario\n\n\
         Reglas de formato: respondes para WhatsApp, usa *negrita* con un solo asterisco, \
         maximo 300 palabras, pocos emojis.\n\n\
         Para registrar un reclamo recolecta EN ORDEN: nombre_completo, numero de DNI, \
         email, telefono y la descripcion del problema. Luego muestra un resumen de \
         confirmacion y espera que el usuario responda si, correcto, confirmo, ok o dale.\n\
         Cuando el usuario confirme, emite EXACTAMENTE una linea con este formato y nada mas:\n\
         >>>REGISTRAR_RECLAMO:{{\"nombre_completo\":\"...\",\"tipo_documento\":\"DNI\",\
         \"numero_documento\":\"...\",\"email\":\"...\",\"telefono\":\"...\",\
         \"descripcion\":\"...\"}}<<<\n\
         Nunca muestres ese marcador al usuario en ningun otro caso.",
        razon = tenant.razon_social,
        ruc = tenant.ruc,
        web = tenant.sitio_web.as_deref().unwrap_or("no disponible"),
        email = tenant.email_contacto.as_deref().unwrap_or("no disponible"),
        fono = tenant.telefono_contacto.as_deref().unwrap_or("no disponible"),
        plazo = tenant.plazo_respuesta_dias,
    )
}

/// Respuestas deterministas cuando el gateway de IA no esta disponible,
/// para que la conversacion degrade con gracia.
fn respuesta_enlatada(texto: &str, tenant: &Tenant) -> String {
    let t = texto.to_lowercase();
    if t.contains("hola") || t.contains("buenos") || t.contains("buenas") {
        format!(
            "¡Hola! 👋 Soy el asistente del Libro de Reclamaciones de {}. Puedo registrar un reclamo o consultar el estado de uno existente si me envias su codigo.",
            tenant.razon_social
        )
    } else if t.contains("estado") || t.contains("seguimiento") || t.contains("codigo") {
        "Para consultar el estado de tu reclamo enviame su codigo (por ejemplo 2026-EMPRESA-AB12CD).".to_string()
    } else if t.contains("gracias") {
        "¡De nada! Estoy aqui si necesitas algo mas. 🙌".to_string()
    } else {
        "En este momento no puedo procesar tu consulta. Intentalo de nuevo en unos minutos o escribe *asesor* para hablar con una persona.".to_string()
    }
}

/// Pasa la salida del modelo a formato WhatsApp: negrita de un asterisco y
/// titulos como lineas en negrita.
pub(super) fn limpiar_markdown(texto: &str) -> String {
    let sin_negrita = texto.replace("**", "*");
    sin_negrita
        .lines()
        .map(|linea| {
            let recortada = linea.trim_start();
            if let Some(resto) = recortada
                .strip_prefix("### ")
                .or_else(|| recortada.strip_prefix("## "))
                .or_else(|| recortada.strip_prefix("# "))
            {
                format!("*{}*", resto.trim())
            } else {
                linea.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct DatosMarcador {
    #[serde(default)]
    nombre_completo: String,
    #[serde(default)]
    tipo_documento: String,
    #[serde(default)]
    numero_documento: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    telefono: String,
    #[serde(default)]
    descripcion: String,
}

pub(super) fn extraer_marcador(texto: &str) -> Option<&str> {
    let inicio = texto.find(MARCADOR_INICIO)? + MARCADOR_INICIO.len();
    let fin = texto[inicio..].find(MARCADOR_FIN)? + inicio;
    Some(texto[inicio..fin].trim())
}

/// La IA es un cliente con efectos sancionados: el marcador es el protocolo
/// cerrado entre el prompt y este handler. Cada campo se revalida aqui
/// antes de tocar la base. Un registro fallido sigue siendo un turno: se
/// guarda en memoria para que la proxima vuelta conserve el contexto.
async fn registrar_desde_marcador(
    state: &AppState,
    tenant: &Tenant,
    from: &str,
    texto_usuario: &str,
    texto_ia: &str,
) -> String {
    let fallo = |respuesta: String| {
        state.memoria.registrar_turno(
            from,
            tenant.id,
            ChatMessage::user(texto_usuario.to_string()),
            Some(ChatMessage::assistant(respuesta.clone())),
        );
        respuesta
    };

    let Some(json_crudo) = extraer_marcador(texto_ia) else {
        warn!("marcador malformado en la salida de la IA");
        return fallo(MSG_NO_PROCESADO.to_string());
    };
    let datos: DatosMarcador = match serde_json::from_str(json_crudo) {
        Ok(d) => d,
        Err(e) => {
            warn!("json del marcador invalido: {}", e);
            return fallo(MSG_NO_PROCESADO.to_string());
        }
    };
    if datos.nombre_completo.trim().is_empty()
        || datos.numero_documento.trim().is_empty()
        || datos.email.trim().is_empty()
        || datos.descripcion.trim().is_empty()
    {
        return fallo(MSG_DATOS_INCOMPLETOS.to_string());
    }

    let request = CrearReclamoRequest {
        tipo: tipo_reclamo::RECLAMO.to_string(),
        sede_slug: None,
        nombre_completo: datos.nombre_completo,
        tipo_documento: datos.tipo_documento,
        numero_documento: datos.numero_documento,
        email: datos.email,
        telefono: Some(if datos.telefono.trim().is_empty() {
            from.to_string()
        } else {
            datos.telefono
        }),
        direccion: None,
        es_menor_edad: false,
        nombre_apoderado: None,
        descripcion_bien: None,
        monto_reclamado: None,
        descripcion: datos.descripcion,
        pedido_consumidor: "Solución al problema reportado".to_string(),
        fecha_incidente: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    let tenant_registro = tenant.clone();
    let resultado = blocking(&state.conn, move |conn| {
        publico::registrar_reclamo(
            conn,
            &tenant_registro,
            request,
            canal_origen::WHATSAPP,
            None,
        )
    })
    .await;

    match resultado {
        Ok(reclamo) => {
            publico::notificar_registro(state, tenant, &reclamo);
            // La recoleccion termino; la proxima conversacion arranca limpia.
            state.memoria.olvidar(from);
            format!(
                "✅ *Reclamo registrado*\n\n\
                 Codigo: *{}*\n\
                 Registrado: {}\n\
                 Fecha limite de respuesta: {}\n\n\
                 Te enviamos la confirmacion a {}. Guarda el codigo para consultar el estado cuando quieras.",
                reclamo.codigo,
                reclamo.fecha_registro.format("%d/%m/%Y"),
                reclamo.fecha_limite_respuesta.format("%d/%m/%Y"),
                reclamo.email,
            )
        }
        Err(AppError::LimitePlanExcedido { .. }) => fallo(MSG_LIMITE_PLAN.to_string()),
        Err(e) => {
            error!("registro via whatsapp fallo: {}", e);
            fallo(MSG_ERROR_REGISTRO.to_string())
        }
    }
}

/// Si el telefono esta EN_ATENCION, persiste el mensaje del cliente para
/// el panel del asesor y devuelve true.
async fn guardar_mensaje_cliente(
    state: &AppState,
    tenant_id: Uuid,
    from: &str,
    texto: &str,
) -> Result<bool, AppError> {
    let telefono = from.to_string();
    let contenido = texto.to_string();
    blocking(&state.conn, move |conn| {
        match asesores::en_atencion_para(conn, tenant_id, &telefono)? {
            Some(solicitud) => {
                asesores::insertar_mensaje(conn, &solicitud, remitente::CLIENTE, &contenido)?;
                Ok(true)
            }
            None => Ok(false),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AiConfig, AppConfig, DatabaseConfig, JwtConfig, ServerConfig,
    };
    use crate::llm::{ChatProvider, ChatResponse, LlmError};
    use crate::shared::state::AppState;
    use async_trait::async_trait;
    use diesel::r2d2::{ConnectionManager, Pool};
    use std::sync::Arc;

    struct ProveedorInerte;

    #[async_trait]
    impl ChatProvider for ProveedorInerte {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
            Err(LlmError::Provider {
                provider: "inerte".into(),
                message: "sin backend".into(),
            })
        }

        fn name(&self) -> &str {
            "inerte"
        }
    }

    // AppState sin base de datos: el pool nunca se toca en los caminos
    // que fallan antes de registrar.
    fn estado_de_prueba() -> AppState {
        let manager: ConnectionManager<PgConnection> =
            ConnectionManager::new("postgres://localhost:1/no-usada");
        let pool = Pool::builder().max_size(1).build_unchecked(manager);
        let config = AppConfig {
            server: ServerConfig {
                port: 0,
                env: "test".into(),
            },
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 1,
                user: "root".into(),
                password: String::new(),
                database: "no-usada".into(),
                sslmode: "disable".into(),
                max_open_conns: 1,
                max_idle_conns: 0,
                conn_max_lifetime_min: 1,
            },
            jwt: JwtConfig {
                secret: "0123456789abcdef0123456789abcdef".into(),
                expiration_hours: 24,
            },
            api_key_prefix: "lrk".into(),
            rate_limit_per_min: 60,
            rate_limit_per_day: 10_000,
            cors_allowed_origins: vec!["*".into()],
            smtp: None,
            ai: AiConfig {
                provider: "ollama".into(),
                api_key: String::new(),
                model: "llama3.1".into(),
                base_url: "http://localhost:11434".into(),
            },
            ai_fallback: None,
            whatsapp_verify_token: String::new(),
        };
        AppState::new(
            pool,
            Arc::new(config),
            Arc::new(ProveedorInerte),
            Arc::new(MemoriaConversaciones::new()),
            None,
        )
    }

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

    #[tokio::test]
    async fn marcador_malformado_conserva_el_turno_en_memoria() {
        let state = estado_de_prueba();
        let tenant = tenant_demo();
        let respuesta = registrar_desde_marcador(
            &state,
            &tenant,
            "51999888777",
            "confirmo",
            ">>>REGISTRAR_RECLAMO:{esto no es json}<<<",
        )
        .await;
        assert_eq!(respuesta, MSG_NO_PROCESADO);

        let historial = state.memoria.historial("51999888777");
        assert_eq!(historial.len(), 2);
        assert_eq!(historial[0].content, "confirmo");
        assert_eq!(historial[1].content, MSG_NO_PROCESADO);
    }

    #[tokio::test]
    async fn datos_incompletos_conservan_el_turno_en_memoria() {
        let state = estado_de_prueba();
        let tenant = tenant_demo();
        let respuesta = registrar_desde_marcador(
            &state,
            &tenant,
            "51999888777",
            "si, confirmo",
            ">>>REGISTRAR_RECLAMO:{\"nombre_completo\":\"Juan\",\"email\":\"\"}<<<",
        )
        .await;
        assert_eq!(respuesta, MSG_DATOS_INCOMPLETOS);
        assert_eq!(state.memoria.historial("51999888777").len(), 2);
    }

    #[test]
    fn detecta_codigos_de_reclamo() {
        assert_eq!(
            detectar_codigo("mi codigo es 2026-ACME-AB12CD"),
            Some("2026-ACME-AB12CD".to_string())
        );
        assert_eq!(
            detectar_codigo("consulta rec-000123 por favor"),
            Some("REC-000123".to_string())
        );
        assert_eq!(
            detectar_codigo("2025-POLLOSRE-MIRA-0XY9ZZ"),
            Some("2025-POLLOSRE-MIRA-0XY9ZZ".to_string())
        );
        assert_eq!(detectar_codigo("hola, quiero poner un reclamo"), None);
        assert_eq!(detectar_codigo("el año 1999 fue bueno"), None);
    }

    #[test]
    fn extrae_el_marcador() {
        let texto = "Perfecto, registro tu reclamo.\n>>>REGISTRAR_RECLAMO:{\"nombre_completo\":\"Juan\"}<<<";
        assert_eq!(
            extraer_marcador(texto),
            Some("{\"nombre_completo\":\"Juan\"}")
        );
        assert_eq!(extraer_marcador(">>>REGISTRAR_RECLAMO: sin cierre"), None);
        assert_eq!(extraer_marcador("sin marcador"), None);
    }

    #[test]
    fn limpia_markdown_para_whatsapp() {
        let entrada = "## Resumen\nTu reclamo fue **registrado** con exito.\n### Siguiente paso\nEspera la respuesta.";
        let salida = limpiar_markdown(entrada);
        assert_eq!(
            salida,
            "*Resumen*\nTu reclamo fue *registrado* con exito.\n*Siguiente paso*\nEspera la respuesta."
        );
    }

    #[test]
    fn deteccion_de_pedido_de_asesor() {
        assert!(pide_asesor("quiero hablar con un asesor"));
        assert!(pide_asesor("dame un humano por favor"));
        assert!(!pide_asesor("quiero registrar un reclamo"));
    }

    #[test]
    fn marcador_con_campos_vacios_es_incompleto() {
        let datos: DatosMarcador =
            serde_json::from_str("{\"nombre_completo\":\"Juan\",\"email\":\"\"}").unwrap();
        assert!(datos.email.is_empty());
        assert_eq!(datos.tipo_documento, "");
    }
}
