use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use diesel::prelude::*;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::codigo;
use crate::planes::{self, Recurso};
use crate::shared::errors::AppError;
use crate::shared::models::{
    canal_origen, estado_reclamo, remitente, tipo_accion, tipo_documento, tipo_reclamo,
    NuevoHistorialEvento, NuevoReclamo, Reclamo, ReclamoMensaje, Sede, Tenant,
};
use crate::shared::responses::{created, ok};
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/libro/:slug/tenant", get(portada_tenant))
        .route("/libro/:slug/sedes", get(sedes_activas))
        .route("/libro/:slug/reclamos", post(crear_publico))
        .route("/libro/:slug/seguimiento/:codigo", get(seguimiento))
        .route(
            "/libro/:slug/seguimiento/:codigo/mensajes",
            get(listar_mensajes).post(crear_mensaje),
        )
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrearReclamoRequest {
    pub tipo: String,
    pub sede_slug: Option<String>,
    pub nombre_completo: String,
    pub tipo_documento: String,
    pub numero_documento: String,
    pub email: String,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    #[serde(default)]
    pub es_menor_edad: bool,
    pub nombre_apoderado: Option<String>,
    pub descripcion_bien: Option<String>,
    pub monto_reclamado: Option<f64>,
    pub descripcion: String,
    pub pedido_consumidor: String,
    pub fecha_incidente: String,
}

fn resolver_tenant_por_slug(conn: &mut PgConnection, slug: &str) -> Result<Tenant, AppError> {
    use crate::shared::schema::configuracion_tenant::dsl as t;
    t::configuracion_tenant
        .filter(t::slug.eq(slug))
        .filter(t::activo.eq(true))
        .select(Tenant::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("empresa no encontrada".into()))
}

fn validar_request(req: &CrearReclamoRequest) -> Result<NaiveDate, AppError> {
    if !tipo_reclamo::es_valido(&req.tipo) {
        return Err(AppError::Validation("tipo debe ser RECLAMO o QUEJA".into()));
    }
    if req.nombre_completo.trim().is_empty()
        || req.numero_documento.trim().is_empty()
        || req.descripcion.trim().is_empty()
        || req.pedido_consumidor.trim().is_empty()
    {
        return Err(AppError::Validation(
            "nombre_completo, numero_documento, descripcion y pedido_consumidor son requeridos"
                .into(),
        ));
    }
    if !req.email.contains('@') {
        return Err(AppError::Validation("email invalido".into()));
    }
    if req.es_menor_edad && req.nombre_apoderado.as_deref().unwrap_or("").trim().is_empty() {
        return Err(AppError::Validation(
            "nombre_apoderado es requerido para menores de edad".into(),
        ));
    }
    NaiveDate::parse_from_str(req.fecha_incidente.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation("fecha_incidente debe ser YYYY-MM-DD".into()))
}

/// Intake nucleo, compartido por el portal publico, el bot de WhatsApp y
/// el Bot API. Congela snapshots, genera el codigo y deja el evento de
/// historial, todo en una transaccion.
pub fn registrar_reclamo(
    conn: &mut PgConnection,
    tenant: &Tenant,
    req: CrearReclamoRequest,
    canal: &str,
    ip: Option<String>,
) -> Result<Reclamo, AppError> {
    let fecha_incidente = validar_request(&req)?;

    planes::validar_creacion(conn, tenant.id, Recurso::Reclamos)?;

    let sede: Option<Sede> = match req.sede_slug.as_deref().filter(|s| !s.is_empty()) {
        Some(slug) => {
            use crate::shared::schema::sedes::dsl as s;
            Some(
                s::sedes
                    .filter(s::tenant_id.eq(tenant.id))
                    .filter(s::slug.eq(slug))
                    .filter(s::activo.eq(true))
                    .select(Sede::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| AppError::NotFound("sede no encontrada".into()))?,
            )
        }
        None => None,
    };

    let ahora = Utc::now();
    let codigo = codigo::generar(
        ahora.year(),
        &tenant.slug,
        sede.as_ref().map(|s| s.slug.as_str()),
    );

    let nuevo = NuevoReclamo {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        sede_id: sede.as_ref().map(|s| s.id),
        codigo,
        tipo: req.tipo,
        estado: estado_reclamo::PENDIENTE.to_string(),
        canal_origen: canal.to_string(),
        razon_social_proveedor: tenant.razon_social.clone(),
        ruc_proveedor: tenant.ruc.clone(),
        direccion_proveedor: tenant.direccion_legal.clone(),
        sede_nombre: sede.as_ref().map(|s| s.nombre.clone()),
        sede_direccion: sede.as_ref().map(|s| s.direccion.clone()),
        nombre_completo: req.nombre_completo.trim().to_string(),
        tipo_documento: tipo_documento::normalizar(&req.tipo_documento).to_string(),
        numero_documento: req.numero_documento.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        telefono: req.telefono,
        direccion: req.direccion,
        es_menor_edad: req.es_menor_edad,
        nombre_apoderado: req.nombre_apoderado,
        descripcion_bien: req.descripcion_bien,
        monto_reclamado: req.monto_reclamado,
        descripcion: req.descripcion.trim().to_string(),
        pedido_consumidor: req.pedido_consumidor.trim().to_string(),
        fecha_incidente,
        fecha_registro: ahora,
        fecha_limite_respuesta: ahora + Duration::days(i64::from(tenant.plazo_respuesta_dias)),
    };

    let reclamo = conn.transaction::<Reclamo, AppError, _>(|conn| {
        use crate::shared::schema::reclamo_historial::dsl as h;
        use crate::shared::schema::reclamos::dsl as r;

        diesel::insert_into(r::reclamos)
            .values(&nuevo)
            .execute(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    info,
                ) => {
                    // Colision de codigo: ventana sub-microsegundo, no se reintenta.
                    error!("colision de codigo de reclamo: {}", info.message());
                    AppError::internal(anyhow::anyhow!("colision de codigo"))
                }
                otro => AppError::from(otro),
            })?;

        diesel::insert_into(h::reclamo_historial)
            .values(&NuevoHistorialEvento {
                id: Uuid::new_v4(),
                reclamo_id: nuevo.id,
                tenant_id: tenant.id,
                estado_anterior: None,
                estado_nuevo: Some(estado_reclamo::PENDIENTE.to_string()),
                tipo_accion: tipo_accion::CREACION.to_string(),
                comentario: Some(format!("Reclamo registrado via {}", canal)),
                usuario_id: None,
                chatbot_id: None,
                ip,
            })
            .execute(conn)?;

        r::reclamos
            .filter(r::id.eq(nuevo.id))
            .select(Reclamo::as_select())
            .first(conn)
            .map_err(AppError::from)
    })?;

    info!(
        "reclamo {} registrado para tenant {} via {}",
        reclamo.codigo, tenant.slug, canal
    );
    Ok(reclamo)
}

/// Notificaciones best-effort tras el registro. Nunca bloquea ni falla el
/// request que lo origina.
pub fn notificar_registro(state: &AppState, tenant: &Tenant, reclamo: &Reclamo) {
    let Some(mailer) = state.mailer.clone() else {
        return;
    };
    if tenant.notificar_email && !reclamo.email.is_empty() {
        let mailer = mailer.clone();
        let reclamo = reclamo.clone();
        tokio::spawn(async move { mailer.confirmacion_cliente(&reclamo).await });
    }
    if let Some(email_contacto) = tenant.email_contacto.clone() {
        if !email_contacto.is_empty() {
            let reclamo = reclamo.clone();
            tokio::spawn(async move { mailer.aviso_empresa(&email_contacto, &reclamo).await });
        }
    }
}

async fn portada_tenant(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let tenant =
        blocking(&state.conn, move |conn| resolver_tenant_por_slug(conn, &slug)).await?;
    // Solo los campos de marca; nada operativo.
    Ok(ok(json!({
        "razon_social": tenant.razon_social,
        "ruc": tenant.ruc,
        "slug": tenant.slug,
        "direccion_legal": tenant.direccion_legal,
        "sitio_web": tenant.sitio_web,
        "color_primario": tenant.color_primario,
        "logo_url": tenant.logo_url,
        "logo_base64": tenant.logo_base64,
        "plazo_respuesta_dias": tenant.plazo_respuesta_dias,
    })))
}

async fn sedes_activas(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let sedes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::sedes::dsl as s;
        let tenant = resolver_tenant_por_slug(conn, &slug)?;
        s::sedes
            .filter(s::tenant_id.eq(tenant.id))
            .filter(s::activo.eq(true))
            .order((s::es_principal.desc(), s::nombre.asc()))
            .select(Sede::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(sedes))
}

async fn crear_publico(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CrearReclamoRequest>,
) -> Result<axum::response::Response, AppError> {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());

    let (tenant, reclamo) = blocking(&state.conn, move |conn| {
        let tenant = resolver_tenant_por_slug(conn, &slug)?;
        let reclamo = registrar_reclamo(conn, &tenant, body, canal_origen::WEB, ip)?;
        Ok((tenant, reclamo))
    })
    .await?;

    notificar_registro(&state, &tenant, &reclamo);

    Ok(created(json!({
        "codigo_reclamo": reclamo.codigo,
        "fecha_registro": reclamo.fecha_registro,
        "fecha_limite_respuesta": reclamo.fecha_limite_respuesta,
        "mensaje": "Tu reclamo fue registrado. Guarda el codigo para hacer seguimiento.",
    })))
}

fn buscar_por_codigo(
    conn: &mut PgConnection,
    slug: &str,
    codigo_reclamo: &str,
) -> Result<Reclamo, AppError> {
    use crate::shared::schema::reclamos::dsl as r;
    let tenant = resolver_tenant_por_slug(conn, slug)?;
    r::reclamos
        .filter(r::tenant_id.eq(tenant.id))
        .filter(r::codigo.eq(codigo_reclamo))
        .filter(r::deleted_at.is_null())
        .select(Reclamo::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("reclamo no encontrado".into()))
}

async fn seguimiento(
    State(state): State<AppState>,
    Path((slug, codigo_reclamo)): Path<(String, String)>,
) -> Result<axum::response::Response, AppError> {
    let reclamo = blocking(&state.conn, move |conn| {
        buscar_por_codigo(conn, &slug, &codigo_reclamo)
    })
    .await?;

    Ok(ok(json!({
        "codigo": reclamo.codigo,
        "tipo": reclamo.tipo,
        "estado": reclamo.estado,
        "fecha_registro": reclamo.fecha_registro,
        "fecha_limite_respuesta": reclamo.fecha_limite_respuesta,
        "fecha_respuesta": reclamo.fecha_respuesta,
        "sede_nombre": reclamo.sede_nombre,
    })))
}

async fn listar_mensajes(
    State(state): State<AppState>,
    Path((slug, codigo_reclamo)): Path<(String, String)>,
) -> Result<axum::response::Response, AppError> {
    let mensajes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_mensajes::dsl as m;
        let reclamo = buscar_por_codigo(conn, &slug, &codigo_reclamo)?;
        m::reclamo_mensajes
            .filter(m::reclamo_id.eq(reclamo.id))
            .order(m::created_at.asc())
            .select(ReclamoMensaje::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(mensajes))
}

#[derive(Debug, Deserialize)]
struct CrearMensajeRequest {
    contenido: String,
}

async fn crear_mensaje(
    State(state): State<AppState>,
    Path((slug, codigo_reclamo)): Path<(String, String)>,
    Json(body): Json<CrearMensajeRequest>,
) -> Result<axum::response::Response, AppError> {
    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }
    if contenido.chars().count() > 2000 {
        return Err(AppError::Validation("contenido excede 2000 caracteres".into()));
    }

    let mensaje = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_mensajes::dsl as m;
        let reclamo = buscar_por_codigo(conn, &slug, &codigo_reclamo)?;
        if reclamo.estado == estado_reclamo::CERRADO {
            warn!("mensaje a reclamo cerrado {}", reclamo.codigo);
            return Err(AppError::Conflict("el reclamo ya esta cerrado".into()));
        }
        let id = Uuid::new_v4();
        diesel::insert_into(m::reclamo_mensajes)
            .values((
                m::id.eq(id),
                m::reclamo_id.eq(reclamo.id),
                m::tenant_id.eq(reclamo.tenant_id),
                m::remitente.eq(remitente::CLIENTE),
                m::contenido.eq(contenido),
                m::leido.eq(false),
            ))
            .execute(conn)?;
        m::reclamo_mensajes
            .filter(m::id.eq(id))
            .select(ReclamoMensaje::as_select())
            .first(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(created(mensaje))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_base() -> CrearReclamoRequest {
        CrearReclamoRequest {
            tipo: "RECLAMO".into(),
            sede_slug: None,
            nombre_completo: "Juan Perez".into(),
            tipo_documento: "dni".into(),
            numero_documento: "12345678".into(),
            email: "juan@x.pe".into(),
            telefono: None,
            direccion: None,
            es_menor_edad: false,
            nombre_apoderado: None,
            descripcion_bien: None,
            monto_reclamado: None,
            descripcion: "producto defectuoso".into(),
            pedido_consumidor: "cambio del producto".into(),
            fecha_incidente: "2026-08-15".into(),
        }
    }

    #[test]
    fn request_valido_parsea_fecha() {
        let fecha = validar_request(&request_base()).expect("valido");
        assert_eq!(fecha, NaiveDate::from_ymd_opt(2026, 8, 15).unwrap());
    }

    #[test]
    fn tipo_desconocido_es_validation_error() {
        let mut req = request_base();
        req.tipo = "SUGERENCIA".into();
        assert!(validar_request(&req).is_err());
    }

    #[test]
    fn fecha_malformada_es_validation_error() {
        let mut req = request_base();
        req.fecha_incidente = "15/08/2026".into();
        assert!(validar_request(&req).is_err());
    }

    #[test]
    fn menor_de_edad_requiere_apoderado() {
        let mut req = request_base();
        req.es_menor_edad = true;
        assert!(validar_request(&req).is_err());
        req.nombre_apoderado = Some("Maria Perez".into());
        assert!(validar_request(&req).is_ok());
    }
}
