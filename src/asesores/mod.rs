use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::shared::errors::AppError;
use crate::shared::models::{
    canal_origen, estado_solicitud, prioridad_solicitud, remitente, CanalWhatsApp,
    MensajeAtencion, SolicitudAsesor,
};
use crate::shared::responses::{created, ok, Paginado};
use crate::shared::state::AppState;
use crate::shared::utils::{blocking, paginacion};
use crate::whatsapp::enviar_texto;

const MAX_SOLICITUDES_ABIERTAS: i64 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/solicitudes-asesor", get(listar))
        .route("/solicitudes-asesor/:id", get(detalle))
        .route("/solicitudes-asesor/:id/mensajes", get(mensajes).post(enviar_como_asesor))
        .route("/solicitudes-asesor/:id/asignar", post(asignar))
        .route("/solicitudes-asesor/:id/resolver", post(resolver))
        .route("/solicitudes-asesor/:id/cancelar", post(cancelar))
}

// ---------------------------------------------------------------------------
// Nucleo compartido con el pipeline de WhatsApp
// ---------------------------------------------------------------------------

/// Crea una solicitud PENDIENTE. Un telefono puede tener a lo sumo 5
/// solicitudes abiertas por tenant.
pub fn crear_solicitud(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    nombre_cliente: &str,
    telefono: &str,
    motivo: Option<String>,
    canal_whatsapp_id: Option<Uuid>,
    resumen_conversacion: Option<String>,
) -> Result<SolicitudAsesor, AppError> {
    use crate::shared::schema::solicitudes_asesor::dsl as s;

    let abiertas: i64 = s::solicitudes_asesor
        .filter(s::tenant_id.eq(tenant_id))
        .filter(s::telefono.eq(telefono))
        .filter(s::estado.eq_any([estado_solicitud::PENDIENTE, estado_solicitud::EN_ATENCION]))
        .count()
        .get_result(conn)?;
    if abiertas >= MAX_SOLICITUDES_ABIERTAS {
        warn!("telefono {} alcanzo el tope de solicitudes abiertas", telefono);
        return Err(AppError::LimiteSolicitudes);
    }

    let id = Uuid::new_v4();
    diesel::insert_into(s::solicitudes_asesor)
        .values((
            s::id.eq(id),
            s::tenant_id.eq(tenant_id),
            s::nombre_cliente.eq(nombre_cliente),
            s::telefono.eq(telefono),
            s::motivo.eq(motivo),
            s::canal_origen.eq(canal_origen::WHATSAPP),
            s::canal_whatsapp_id.eq(canal_whatsapp_id),
            s::estado.eq(estado_solicitud::PENDIENTE),
            s::prioridad.eq(prioridad_solicitud::NORMAL),
            s::resumen_conversacion.eq(resumen_conversacion),
        ))
        .execute(conn)?;

    s::solicitudes_asesor
        .filter(s::id.eq(id))
        .select(SolicitudAsesor::as_select())
        .first(conn)
        .map_err(AppError::from)
}

/// Solicitud EN_ATENCION vigente para un telefono, si existe. El pipeline
/// la usa para cortocircuitar la IA durante la atencion humana.
pub fn en_atencion_para(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    telefono: &str,
) -> Result<Option<SolicitudAsesor>, AppError> {
    use crate::shared::schema::solicitudes_asesor::dsl as s;
    s::solicitudes_asesor
        .filter(s::tenant_id.eq(tenant_id))
        .filter(s::telefono.eq(telefono))
        .filter(s::estado.eq(estado_solicitud::EN_ATENCION))
        .order(s::created_at.desc())
        .select(SolicitudAsesor::as_select())
        .first(conn)
        .optional()
        .map_err(AppError::from)
}

pub fn insertar_mensaje(
    conn: &mut PgConnection,
    solicitud: &SolicitudAsesor,
    quien: &str,
    contenido: &str,
) -> Result<MensajeAtencion, AppError> {
    use crate::shared::schema::mensajes_atencion::dsl as m;
    let id = Uuid::new_v4();
    diesel::insert_into(m::mensajes_atencion)
        .values((
            m::id.eq(id),
            m::solicitud_id.eq(solicitud.id),
            m::tenant_id.eq(solicitud.tenant_id),
            m::remitente.eq(quien),
            m::contenido.eq(contenido),
        ))
        .execute(conn)?;
    m::mensajes_atencion
        .filter(m::id.eq(id))
        .select(MensajeAtencion::as_select())
        .first(conn)
        .map_err(AppError::from)
}

fn cargar_solicitud(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    solicitud_id: Uuid,
) -> Result<SolicitudAsesor, AppError> {
    use crate::shared::schema::solicitudes_asesor::dsl as s;
    s::solicitudes_asesor
        .filter(s::id.eq(solicitud_id))
        .filter(s::tenant_id.eq(tenant_id))
        .select(SolicitudAsesor::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("solicitud no encontrada".into()))
}

fn exigir_abierta(solicitud: &SolicitudAsesor) -> Result<(), AppError> {
    if estado_solicitud::es_abierta(&solicitud.estado) {
        Ok(())
    } else {
        Err(AppError::SolicitudCerrada)
    }
}

/// Reenvia un mensaje al cliente por WhatsApp si la solicitud esta ligada
/// a un canal. Fire-and-forget con contexto propio.
fn despachar_whatsapp(state: &AppState, solicitud: &SolicitudAsesor, contenido: String) {
    let Some(canal_id) = solicitud.canal_whatsapp_id else {
        return;
    };
    let pool = state.conn.clone();
    let telefono = solicitud.telefono.clone();
    tokio::spawn(async move {
        let canal = blocking(&pool, move |conn| {
            use crate::shared::schema::canales_whatsapp::dsl as cw;
            cw::canales_whatsapp
                .filter(cw::id.eq(canal_id))
                .filter(cw::activo.eq(true))
                .select(CanalWhatsApp::as_select())
                .first(conn)
                .optional()
                .map_err(AppError::from)
        })
        .await;
        match canal {
            Ok(Some(canal)) => {
                enviar_texto(&canal.access_token, &canal.phone_number_id, &telefono, &contenido)
                    .await
            }
            Ok(None) => warn!("canal {} inactivo, no se despacha el mensaje", canal_id),
            Err(e) => warn!("no se pudo cargar el canal {}: {}", canal_id, e),
        }
    });
}

// ---------------------------------------------------------------------------
// Panel del asesor
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FiltrosSolicitud {
    page: Option<i64>,
    per_page: Option<i64>,
    estado: Option<String>,
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filtros): Query<FiltrosSolicitud>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let (page, per_page) = paginacion(filtros.page, filtros.per_page);

    let listado = blocking(&state.conn, move |conn| {
        use crate::shared::schema::solicitudes_asesor::dsl as s;

        let armar = || {
            let mut q = s::solicitudes_asesor
                .filter(s::tenant_id.eq(tenant_id))
                .into_boxed();
            if let Some(estado) = &filtros.estado {
                q = q.filter(s::estado.eq(estado.clone()));
            }
            q
        };

        let total: i64 = armar().count().get_result(conn)?;
        // URGENTE primero, luego antiguedad.
        let items: Vec<SolicitudAsesor> = armar()
            .order((
                sql::<Integer>(
                    "CASE prioridad WHEN 'URGENTE' THEN 4 WHEN 'ALTA' THEN 3 \
                     WHEN 'NORMAL' THEN 2 ELSE 1 END",
                )
                .desc(),
                s::created_at.asc(),
            ))
            .limit(per_page)
            .offset((page - 1) * per_page)
            .select(SolicitudAsesor::as_select())
            .load(conn)?;
        Ok(Paginado::new(items, total, page, per_page))
    })
    .await?;
    Ok(ok(listado))
}

async fn detalle(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let solicitud = blocking(&state.conn, move |conn| {
        cargar_solicitud(conn, tenant_id, solicitud_id)
    })
    .await?;
    Ok(ok(solicitud))
}

async fn mensajes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let mensajes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::mensajes_atencion::dsl as m;
        cargar_solicitud(conn, tenant_id, solicitud_id)?;
        m::mensajes_atencion
            .filter(m::solicitud_id.eq(solicitud_id))
            .order(m::created_at.asc())
            .select(MensajeAtencion::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(mensajes))
}

#[derive(Debug, Deserialize)]
struct MensajeAsesorRequest {
    contenido: String,
}

async fn enviar_como_asesor(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
    Json(body): Json<MensajeAsesorRequest>,
) -> Result<axum::response::Response, AppError> {
    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }

    let tenant_id = principal.tenant_id;
    let contenido_envio = contenido.clone();
    let (solicitud, mensaje) = blocking(&state.conn, move |conn| {
        let solicitud = cargar_solicitud(conn, tenant_id, solicitud_id)?;
        exigir_abierta(&solicitud)?;
        let mensaje = insertar_mensaje(conn, &solicitud, remitente::ASESOR, &contenido)?;
        Ok((solicitud, mensaje))
    })
    .await?;

    despachar_whatsapp(&state, &solicitud, contenido_envio);
    Ok(created(mensaje))
}

#[derive(Debug, Deserialize)]
struct AsignarRequest {
    prioridad: Option<String>,
    nota_interna: Option<String>,
}

/// "Tomar" la solicitud: PENDIENTE -> EN_ATENCION con asignado_a = quien
/// llama. Inserta el mensaje de sistema y lo reenvia al cliente.
async fn asignar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
    Json(body): Json<AsignarRequest>,
) -> Result<axum::response::Response, AppError> {
    if let Some(p) = &body.prioridad {
        if !prioridad_solicitud::es_valida(p) {
            return Err(AppError::Validation(format!("prioridad desconocida: {}", p)));
        }
    }

    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let (solicitud, aviso) = blocking(&state.conn, move |conn| {
        use crate::shared::schema::solicitudes_asesor::dsl as s;
        use crate::shared::schema::usuarios_admin::dsl as u;

        conn.transaction::<(SolicitudAsesor, String), AppError, _>(|conn| {
            let actual = cargar_solicitud(conn, tenant_id, solicitud_id)?;
            exigir_abierta(&actual)?;

            let nombre_asesor: String = u::usuarios_admin
                .filter(u::id.eq(usuario_id))
                .select(u::nombre_completo)
                .first(conn)?;

            diesel::update(s::solicitudes_asesor.filter(s::id.eq(solicitud_id)))
                .set((
                    s::estado.eq(estado_solicitud::EN_ATENCION),
                    s::asignado_a.eq(usuario_id),
                    s::fecha_asignacion.eq(Utc::now()),
                    body.prioridad.clone().map(|p| s::prioridad.eq(p)),
                    body.nota_interna.clone().map(|n| s::nota_interna.eq(n)),
                    s::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            let solicitud = cargar_solicitud(conn, tenant_id, solicitud_id)?;
            let aviso = format!("Ahora estas siendo atendido por *{}*.", nombre_asesor);
            insertar_mensaje(conn, &solicitud, remitente::SISTEMA, &aviso)?;
            Ok((solicitud, aviso))
        })
    })
    .await?;

    despachar_whatsapp(&state, &solicitud, aviso);
    info!("solicitud {} asignada a {}", solicitud_id, principal.user_id);
    Ok(ok(solicitud))
}

#[derive(Debug, Deserialize)]
struct CerrarRequest {
    nota: Option<String>,
}

async fn resolver(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
    Json(body): Json<CerrarRequest>,
) -> Result<axum::response::Response, AppError> {
    cerrar(state, principal, solicitud_id, body.nota, estado_solicitud::RESUELTO).await
}

async fn cancelar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(solicitud_id): Path<Uuid>,
    Json(body): Json<CerrarRequest>,
) -> Result<axum::response::Response, AppError> {
    cerrar(state, principal, solicitud_id, body.nota, estado_solicitud::CANCELADO).await
}

/// Cierre comun: valida que siga abierta, sella fecha_resolucion, deja el
/// mensaje de sistema y lo reenvia. Tras el cierre el bot retoma la
/// conversacion del telefono.
async fn cerrar(
    state: AppState,
    principal: Principal,
    solicitud_id: Uuid,
    nota: Option<String>,
    estado_final: &'static str,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let (solicitud, aviso) = blocking(&state.conn, move |conn| {
        use crate::shared::schema::solicitudes_asesor::dsl as s;

        conn.transaction::<(SolicitudAsesor, String), AppError, _>(|conn| {
            let actual = cargar_solicitud(conn, tenant_id, solicitud_id)?;
            exigir_abierta(&actual)?;

            diesel::update(s::solicitudes_asesor.filter(s::id.eq(solicitud_id)))
                .set((
                    s::estado.eq(estado_final),
                    s::fecha_resolucion.eq(Utc::now()),
                    nota.clone().map(|n| s::nota_interna.eq(n)),
                    s::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            let solicitud = cargar_solicitud(conn, tenant_id, solicitud_id)?;
            let aviso = if estado_final == estado_solicitud::RESUELTO {
                "La atencion fue finalizada. El asistente virtual queda a tu disposicion. 🙌"
            } else {
                "La solicitud de atencion fue cancelada. El asistente virtual queda a tu disposicion."
            };
            insertar_mensaje(conn, &solicitud, remitente::SISTEMA, aviso)?;
            Ok((solicitud, aviso.to_string()))
        })
    })
    .await?;

    despachar_whatsapp(&state, &solicitud, aviso);
    info!("solicitud {} cerrada como {}", solicitud_id, estado_final);
    Ok(ok(solicitud))
}
