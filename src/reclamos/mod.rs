pub mod codigo;
pub mod publico;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::shared::errors::AppError;
use crate::shared::models::{
    estado_reclamo, remitente, tipo_accion, HistorialEvento, NuevoHistorialEvento, Reclamo,
    ReclamoMensaje, ReclamoRespuesta, Tenant,
};
use crate::shared::responses::{created, no_content, ok, Paginado};
use crate::shared::state::AppState;
use crate::shared::utils::{blocking, paginacion};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reclamos", get(listar))
        .route("/reclamos/:id", get(detalle))
        .route("/reclamos/:id", delete(eliminar))
        .route("/reclamos/:id/estado", patch(cambiar_estado))
        .route("/reclamos/:id/respuestas", post(responder))
        .route("/reclamos/:id/respuestas", get(listar_respuestas))
        .route("/reclamos/:id/mensajes", get(listar_mensajes).post(enviar_mensaje))
        .route("/reclamos/:id/historial", get(historial))
}

#[derive(Debug, Default, Deserialize)]
pub struct FiltrosReclamo {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub sede_id: Option<Uuid>,
    pub estado: Option<String>,
    pub tipo: Option<String>,
    pub periodo: Option<String>,
    pub fecha_desde: Option<NaiveDate>,
    pub fecha_hasta: Option<NaiveDate>,
    pub busqueda: Option<String>,
}

/// Inicio del rango para `periodo` ∈ {hoy, semana, mes, anio}.
pub(crate) fn inicio_periodo(periodo: &str, ahora: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let hoy = ahora.date_naive();
    let inicio = match periodo {
        "hoy" => hoy,
        "semana" => hoy - Duration::days(i64::from(hoy.weekday().num_days_from_monday())),
        "mes" => hoy.with_day(1)?,
        "anio" => NaiveDate::from_ymd_opt(hoy.year(), 1, 1)?,
        _ => return None,
    };
    Some(Utc.from_utc_datetime(&inicio.and_time(NaiveTime::MIN)))
}

/// Fila de listado: el reclamo mas el nombre del usuario que lo atiende,
/// proyectado con LEFT JOIN sobre `usuarios_admin`.
#[derive(Debug, Serialize)]
pub struct ReclamoListado {
    #[serde(flatten)]
    pub reclamo: Reclamo,
    pub nombre_atendido_por: Option<String>,
}

async fn listar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filtros): Query<FiltrosReclamo>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let (page, per_page) = paginacion(filtros.page, filtros.per_page);

    let listado = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamos::dsl as r;
        use crate::shared::schema::usuarios_admin::dsl as u;

        let armar = || {
            let mut q = r::reclamos
                .left_join(u::usuarios_admin.on(r::atendido_por.eq(u::id.nullable())))
                .filter(r::tenant_id.eq(tenant_id))
                .filter(r::deleted_at.is_null())
                .into_boxed();
            if let Some(sede_id) = filtros.sede_id {
                q = q.filter(r::sede_id.eq(sede_id));
            }
            if let Some(estado) = &filtros.estado {
                q = q.filter(r::estado.eq(estado.clone()));
            }
            if let Some(tipo) = &filtros.tipo {
                q = q.filter(r::tipo.eq(tipo.clone()));
            }
            if let Some(periodo) = &filtros.periodo {
                if let Some(desde) = inicio_periodo(periodo, Utc::now()) {
                    q = q.filter(r::fecha_registro.ge(desde));
                }
            }
            if let Some(desde) = filtros.fecha_desde {
                q = q.filter(
                    r::fecha_registro.ge(Utc.from_utc_datetime(&desde.and_time(NaiveTime::MIN))),
                );
            }
            if let Some(hasta) = filtros.fecha_hasta {
                let fin = hasta + Duration::days(1);
                q = q.filter(
                    r::fecha_registro.lt(Utc.from_utc_datetime(&fin.and_time(NaiveTime::MIN))),
                );
            }
            if let Some(busqueda) = &filtros.busqueda {
                let patron = format!("%{}%", busqueda.trim());
                q = q.filter(
                    r::codigo
                        .ilike(patron.clone())
                        .or(r::nombre_completo.ilike(patron.clone()))
                        .or(r::numero_documento.ilike(patron)),
                );
            }
            q
        };

        let total: i64 = armar().count().get_result(conn)?;
        let filas: Vec<(Reclamo, Option<String>)> = armar()
            .order(r::fecha_registro.desc())
            .limit(per_page)
            .offset((page - 1) * per_page)
            .select((Reclamo::as_select(), u::nombre_completo.nullable()))
            .load(conn)?;

        let items = filas
            .into_iter()
            .map(|(reclamo, nombre_atendido_por)| ReclamoListado {
                reclamo,
                nombre_atendido_por,
            })
            .collect();
        Ok(Paginado::new(items, total, page, per_page))
    })
    .await?;

    Ok(ok(listado))
}

fn cargar_reclamo(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    reclamo_id: Uuid,
) -> Result<Reclamo, AppError> {
    use crate::shared::schema::reclamos::dsl as r;
    r::reclamos
        .filter(r::id.eq(reclamo_id))
        .filter(r::tenant_id.eq(tenant_id))
        .filter(r::deleted_at.is_null())
        .select(Reclamo::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound("reclamo no encontrado".into()))
}

async fn detalle(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let fila = blocking(&state.conn, move |conn| {
        use crate::shared::schema::usuarios_admin::dsl as u;

        let reclamo = cargar_reclamo(conn, tenant_id, reclamo_id)?;
        let nombre_atendido_por = match reclamo.atendido_por {
            Some(usuario_id) => u::usuarios_admin
                .filter(u::id.eq(usuario_id))
                .select(u::nombre_completo)
                .first::<String>(conn)
                .optional()?,
            None => None,
        };
        Ok(ReclamoListado {
            reclamo,
            nombre_atendido_por,
        })
    })
    .await?;
    Ok(ok(fila))
}

#[derive(Debug, Deserialize)]
struct CambiarEstadoRequest {
    estado: String,
    comentario: Option<String>,
}

fn ip_de(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
}

async fn cambiar_estado(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CambiarEstadoRequest>,
) -> Result<axum::response::Response, AppError> {
    if !estado_reclamo::TODOS.contains(&body.estado.as_str()) {
        return Err(AppError::Validation(format!("estado desconocido: {}", body.estado)));
    }
    let ip = ip_de(&headers);

    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let reclamo = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_historial::dsl as h;
        use crate::shared::schema::reclamos::dsl as r;

        conn.transaction::<Reclamo, AppError, _>(|conn| {
            let actual = cargar_reclamo(conn, tenant_id, reclamo_id)?;
            if !estado_reclamo::transicion_valida(&actual.estado, &body.estado) {
                return Err(AppError::Conflict(format!(
                    "transicion invalida: {} -> {}",
                    actual.estado, body.estado
                )));
            }

            let reabre = matches!(
                actual.estado.as_str(),
                estado_reclamo::CERRADO | estado_reclamo::RECHAZADO
            );
            let ahora = Utc::now();
            let fecha_cierre = match body.estado.as_str() {
                estado_reclamo::CERRADO | estado_reclamo::RECHAZADO => Some(ahora),
                _ => None,
            };

            diesel::update(r::reclamos.filter(r::id.eq(reclamo_id)))
                .set((
                    r::estado.eq(&body.estado),
                    r::fecha_cierre.eq(fecha_cierre),
                    r::atendido_por.eq(usuario_id),
                    r::updated_at.eq(ahora),
                ))
                .execute(conn)?;

            diesel::insert_into(h::reclamo_historial)
                .values(&NuevoHistorialEvento {
                    id: Uuid::new_v4(),
                    reclamo_id,
                    tenant_id,
                    estado_anterior: Some(actual.estado.clone()),
                    estado_nuevo: Some(body.estado.clone()),
                    tipo_accion: if reabre {
                        tipo_accion::REAPERTURA.to_string()
                    } else {
                        tipo_accion::CAMBIO_ESTADO.to_string()
                    },
                    comentario: body.comentario.clone(),
                    usuario_id: Some(usuario_id),
                    chatbot_id: None,
                    ip: ip.clone(),
                })
                .execute(conn)?;

            cargar_reclamo(conn, tenant_id, reclamo_id)
        })
    })
    .await?;

    info!(
        "reclamo {} paso a {} por usuario {}",
        reclamo.codigo, reclamo.estado, principal.user_id
    );
    Ok(ok(reclamo))
}

#[derive(Debug, Deserialize)]
struct ResponderRequest {
    contenido: String,
}

/// Publica la respuesta oficial de la empresa. Inserta la respuesta,
/// transiciona PENDIENTE|EN_PROCESO -> RESUELTO, sella fecha_respuesta y
/// deja el evento de historial, todo en una transaccion.
async fn responder(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ResponderRequest>,
) -> Result<axum::response::Response, AppError> {
    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }
    let ip = ip_de(&headers);

    let tenant_id = principal.tenant_id;
    let usuario_id = principal.user_id;
    let contenido_mail = contenido.clone();
    let (tenant, reclamo, respuesta) = blocking(&state.conn, move |conn| {
        use crate::shared::schema::configuracion_tenant::dsl as t;
        use crate::shared::schema::reclamo_historial::dsl as h;
        use crate::shared::schema::reclamo_respuestas::dsl as rr;
        use crate::shared::schema::reclamos::dsl as r;

        conn.transaction::<(Tenant, Reclamo, ReclamoRespuesta), AppError, _>(|conn| {
            let actual = cargar_reclamo(conn, tenant_id, reclamo_id)?;
            let transiciona = matches!(
                actual.estado.as_str(),
                estado_reclamo::PENDIENTE | estado_reclamo::EN_PROCESO
            );
            if !transiciona && actual.estado == estado_reclamo::CERRADO {
                return Err(AppError::Conflict("el reclamo ya esta cerrado".into()));
            }

            let respuesta_id = Uuid::new_v4();
            diesel::insert_into(rr::reclamo_respuestas)
                .values((
                    rr::id.eq(respuesta_id),
                    rr::reclamo_id.eq(reclamo_id),
                    rr::tenant_id.eq(tenant_id),
                    rr::usuario_id.eq(usuario_id),
                    rr::contenido.eq(&contenido),
                ))
                .execute(conn)?;

            let ahora = Utc::now();
            if transiciona {
                diesel::update(r::reclamos.filter(r::id.eq(reclamo_id)))
                    .set((
                        r::estado.eq(estado_reclamo::RESUELTO),
                        r::fecha_respuesta.eq(ahora),
                        r::atendido_por.eq(usuario_id),
                        r::updated_at.eq(ahora),
                    ))
                    .execute(conn)?;
            } else {
                diesel::update(r::reclamos.filter(r::id.eq(reclamo_id)))
                    .set((r::fecha_respuesta.eq(ahora), r::updated_at.eq(ahora)))
                    .execute(conn)?;
            }

            diesel::insert_into(h::reclamo_historial)
                .values(&NuevoHistorialEvento {
                    id: Uuid::new_v4(),
                    reclamo_id,
                    tenant_id,
                    estado_anterior: Some(actual.estado.clone()),
                    estado_nuevo: transiciona.then(|| estado_reclamo::RESUELTO.to_string()),
                    tipo_accion: tipo_accion::RESPUESTA.to_string(),
                    comentario: None,
                    usuario_id: Some(usuario_id),
                    chatbot_id: None,
                    ip,
                })
                .execute(conn)?;

            let reclamo = cargar_reclamo(conn, tenant_id, reclamo_id)?;
            let respuesta = rr::reclamo_respuestas
                .filter(rr::id.eq(respuesta_id))
                .select(ReclamoRespuesta::as_select())
                .first(conn)?;
            let tenant = t::configuracion_tenant
                .filter(t::id.eq(tenant_id))
                .select(Tenant::as_select())
                .first(conn)?;
            Ok((tenant, reclamo, respuesta))
        })
    })
    .await?;

    if tenant.notificar_cliente {
        if let Some(mailer) = state.mailer.clone() {
            let reclamo_mail = reclamo.clone();
            tokio::spawn(async move {
                mailer
                    .respuesta_publicada(&reclamo_mail, &contenido_mail)
                    .await
            });
        }
    }

    info!("respuesta publicada en reclamo {}", reclamo.codigo);
    Ok(created(serde_json::json!({
        "respuesta": respuesta,
        "reclamo": reclamo,
    })))
}

async fn listar_respuestas(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let respuestas = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_respuestas::dsl as rr;
        cargar_reclamo(conn, tenant_id, reclamo_id)?;
        rr::reclamo_respuestas
            .filter(rr::reclamo_id.eq(reclamo_id))
            .order(rr::created_at.asc())
            .select(ReclamoRespuesta::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(respuestas))
}

async fn listar_mensajes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let mensajes = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_mensajes::dsl as m;
        cargar_reclamo(conn, tenant_id, reclamo_id)?;

        // El panel acaba de leer el hilo: marca lo del cliente como leido.
        diesel::update(
            m::reclamo_mensajes
                .filter(m::reclamo_id.eq(reclamo_id))
                .filter(m::remitente.eq(remitente::CLIENTE))
                .filter(m::leido.eq(false)),
        )
        .set((m::leido.eq(true), m::leido_en.eq(Utc::now())))
        .execute(conn)?;

        m::reclamo_mensajes
            .filter(m::reclamo_id.eq(reclamo_id))
            .order(m::created_at.asc())
            .select(ReclamoMensaje::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(mensajes))
}

#[derive(Debug, Deserialize)]
struct MensajeEmpresaRequest {
    contenido: String,
}

async fn enviar_mensaje(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
    Json(body): Json<MensajeEmpresaRequest>,
) -> Result<axum::response::Response, AppError> {
    let contenido = body.contenido.trim().to_string();
    if contenido.is_empty() {
        return Err(AppError::Validation("contenido es requerido".into()));
    }

    let tenant_id = principal.tenant_id;
    let mensaje = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_mensajes::dsl as m;
        let reclamo = cargar_reclamo(conn, tenant_id, reclamo_id)?;
        if reclamo.estado == estado_reclamo::CERRADO {
            return Err(AppError::Conflict("el reclamo ya esta cerrado".into()));
        }
        let id = Uuid::new_v4();
        diesel::insert_into(m::reclamo_mensajes)
            .values((
                m::id.eq(id),
                m::reclamo_id.eq(reclamo_id),
                m::tenant_id.eq(tenant_id),
                m::remitente.eq(remitente::EMPRESA),
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

async fn historial(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let eventos = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamo_historial::dsl as h;
        cargar_reclamo(conn, tenant_id, reclamo_id)?;
        h::reclamo_historial
            .filter(h::reclamo_id.eq(reclamo_id))
            .order(h::created_at.asc())
            .select(HistorialEvento::as_select())
            .load(conn)
            .map_err(AppError::from)
    })
    .await?;
    Ok(ok(eventos))
}

async fn eliminar(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(reclamo_id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamos::dsl as r;
        cargar_reclamo(conn, tenant_id, reclamo_id)?;
        diesel::update(r::reclamos.filter(r::id.eq(reclamo_id)))
            .set((r::deleted_at.eq(Utc::now()), r::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    info!("reclamo {} eliminado (soft) en tenant {}", reclamo_id, tenant_id);
    Ok(no_content())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inicio_periodo_calcula_rangos() {
        let ahora = Utc.with_ymd_and_hms(2026, 8, 26, 15, 30, 0).unwrap(); // miercoles
        assert_eq!(
            inicio_periodo("hoy", ahora).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 26, 0, 0, 0).unwrap()
        );
        assert_eq!(
            inicio_periodo("semana", ahora).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 24, 0, 0, 0).unwrap()
        );
        assert_eq!(
            inicio_periodo("mes", ahora).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            inicio_periodo("anio", ahora).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(inicio_periodo("trimestre", ahora).is_none());
    }
}
