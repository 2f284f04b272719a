use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Router,
};
use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::Principal;
use crate::planes;
use crate::reclamos::inicio_periodo;
use crate::shared::errors::AppError;
use crate::shared::models::estado_reclamo;
use crate::shared::responses::ok;
use crate::shared::state::AppState;
use crate::shared::utils::blocking;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(resumen))
}

#[derive(Debug, Deserialize)]
struct FiltrosDashboard {
    sede_id: Option<Uuid>,
    periodo: Option<String>,
    fecha_desde: Option<NaiveDate>,
    fecha_hasta: Option<NaiveDate>,
}

/// Metricas agregadas del tenant: totales por estado, reclamos del mes,
/// vencidos y proximos a vencer, desglose por sede y el snapshot de uso
/// del plan.
async fn resumen(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filtros): Query<FiltrosDashboard>,
) -> Result<axum::response::Response, AppError> {
    let tenant_id = principal.tenant_id;
    let sede_visible = principal.sede_id;

    let datos = blocking(&state.conn, move |conn| {
        use crate::shared::schema::reclamos::dsl as r;
        use crate::shared::schema::sedes::dsl as s;
        use crate::shared::schema::solicitudes_asesor::dsl as sa;

        let ahora = Utc::now();
        let desde = filtros
            .periodo
            .as_deref()
            .and_then(|p| inicio_periodo(p, ahora))
            .or_else(|| {
                filtros
                    .fecha_desde
                    .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
            });
        let hasta = filtros.fecha_hasta.map(|d| {
            Utc.from_utc_datetime(&d.succ_opt().unwrap_or(d).and_time(NaiveTime::MIN))
        });

        // Un usuario ligado a sede solo ve su sede.
        let sede_filtro = sede_visible.or(filtros.sede_id);

        let armar = || {
            let mut q = r::reclamos
                .filter(r::tenant_id.eq(tenant_id))
                .filter(r::deleted_at.is_null())
                .into_boxed();
            if let Some(sede) = sede_filtro {
                q = q.filter(r::sede_id.eq(sede));
            }
            if let Some(d) = desde {
                q = q.filter(r::fecha_registro.ge(d));
            }
            if let Some(h) = hasta {
                q = q.filter(r::fecha_registro.lt(h));
            }
            q
        };

        let total: i64 = armar().count().get_result(conn)?;

        let mut por_estado = serde_json::Map::new();
        for estado in estado_reclamo::TODOS {
            let n: i64 = armar().filter(r::estado.eq(estado)).count().get_result(conn)?;
            por_estado.insert(estado.to_lowercase(), json!(n));
        }

        let inicio_mes = ahora
            .date_naive()
            .with_day(1)
            .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
            .unwrap_or(ahora);
        let este_mes: i64 = r::reclamos
            .filter(r::tenant_id.eq(tenant_id))
            .filter(r::deleted_at.is_null())
            .filter(r::fecha_registro.ge(inicio_mes))
            .count()
            .get_result(conn)?;

        let abiertos = vec![estado_reclamo::PENDIENTE, estado_reclamo::EN_PROCESO];
        let vencidos: i64 = armar()
            .filter(r::estado.eq_any(abiertos.clone()))
            .filter(r::fecha_limite_respuesta.lt(ahora))
            .count()
            .get_result(conn)?;
        let por_vencer: i64 = armar()
            .filter(r::estado.eq_any(abiertos))
            .filter(r::fecha_limite_respuesta.ge(ahora))
            .filter(r::fecha_limite_respuesta.lt(ahora + chrono::Duration::days(3)))
            .count()
            .get_result(conn)?;

        let sedes: Vec<(Uuid, String)> = s::sedes
            .filter(s::tenant_id.eq(tenant_id))
            .filter(s::activo.eq(true))
            .order(s::nombre.asc())
            .select((s::id, s::nombre))
            .load(conn)?;
        let mut por_sede = Vec::with_capacity(sedes.len());
        for (sede_id, nombre) in sedes {
            if sede_visible.is_some() && sede_visible != Some(sede_id) {
                continue;
            }
            let n: i64 = armar().filter(r::sede_id.eq(sede_id)).count().get_result(conn)?;
            por_sede.push(json!({ "sede_id": sede_id, "nombre": nombre, "reclamos": n }));
        }

        let atencion_pendiente: i64 = sa::solicitudes_asesor
            .filter(sa::tenant_id.eq(tenant_id))
            .filter(sa::estado.eq("PENDIENTE"))
            .count()
            .get_result(conn)?;

        let uso = planes::obtener_uso(conn, tenant_id)?;

        Ok(json!({
            "total_reclamos": total,
            "por_estado": por_estado,
            "reclamos_mes_actual": este_mes,
            "vencidos": vencidos,
            "por_vencer_3_dias": por_vencer,
            "por_sede": por_sede,
            "solicitudes_asesor_pendientes": atencion_pendiente,
            "uso": uso,
        }))
    })
    .await?;

    Ok(ok(datos))
}
