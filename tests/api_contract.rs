//! Contrato de la API JSON: todo éxito viaja como
//! `{"success":true,"data":...}` y todo error como
//! `{"success":false,"error":{code,message}}` con el status correcto.

use axum::body::to_bytes;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::Value;

use reclamoserver::shared::errors::AppError;
use reclamoserver::shared::responses::{created, no_content, ok, Paginado};

async fn cuerpo_json(resp: axum::response::Response) -> (StatusCode, Value) {
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .expect("cuerpo legible");
    let json = serde_json::from_slice(&bytes).expect("cuerpo JSON");
    (status, json)
}

#[tokio::test]
async fn exito_envuelve_en_success_data() {
    let (status, json) = cuerpo_json(ok(serde_json::json!({"hola": "mundo"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["hola"], "mundo");
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn creacion_devuelve_201() {
    let (status, json) = cuerpo_json(created(serde_json::json!({"id": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn desactivacion_devuelve_204_sin_cuerpo() {
    let resp = no_content();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let bytes = to_bytes(resp.into_body(), 1024).await.expect("cuerpo");
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn listado_paginado_serializa_items_y_total() {
    let pagina = Paginado::new(vec!["a", "b"], 7, 1, 2);
    let (status, json) = cuerpo_json(ok(pagina)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["items"], serde_json::json!(["a", "b"]));
    assert_eq!(json["data"]["total"], 7);
    assert_eq!(json["data"]["page"], 1);
    assert_eq!(json["data"]["per_page"], 2);
}

#[tokio::test]
async fn error_envuelve_code_y_message() {
    let err = AppError::NotFound("reclamo no encontrado".into());
    let (status, json) = cuerpo_json(err.into_response()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    assert_eq!(json["error"]["message"], "reclamo no encontrado");
    assert!(json.get("data").is_none());
}

#[tokio::test]
async fn limite_de_plan_expone_codigo_dinamico() {
    let err = AppError::LimitePlanExcedido {
        codigo: "PLAN_LIMIT_SEDES",
        message: "Su plan permite 3 sedes".into(),
    };
    let (status, json) = cuerpo_json(err.into_response()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "PLAN_LIMIT_SEDES");
    assert_eq!(json["error"]["message"], "Su plan permite 3 sedes");
}

#[tokio::test]
async fn rate_limit_por_minuto_anuncia_retry_after() {
    let (status, json) = cuerpo_json(AppError::RateLimitMinute.into_response()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "RATE_LIMIT_MINUTE");
    assert_eq!(json["error"]["retry_after_seconds"], 60);
}

#[tokio::test]
async fn rate_limit_diario_no_anuncia_retry_after() {
    let (_, json) = cuerpo_json(AppError::RateLimitDay.into_response()).await;
    assert_eq!(json["error"]["code"], "RATE_LIMIT_DAY");
    assert!(json["error"].get("retry_after_seconds").is_none());
}

#[tokio::test]
async fn error_interno_no_filtra_la_causa() {
    let err = AppError::internal(std::io::Error::new(
        std::io::ErrorKind::Other,
        "timeout hacia la base de datos en 10.0.0.5",
    ));
    let (status, json) = cuerpo_json(err.into_response()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
    let mensaje = json["error"]["message"].as_str().unwrap();
    assert!(!mensaje.contains("10.0.0.5"));
    assert_eq!(mensaje, "Error interno del servidor");
}

#[tokio::test]
async fn auth_y_scopes_mapean_status() {
    assert_eq!(
        AppError::TokenRequired.into_response().status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        AppError::ApiKeyExpired.into_response().status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        AppError::ScopeDenied("cambiar_estado".into())
            .into_response()
            .status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        AppError::OptimisticLock.into_response().status(),
        StatusCode::CONFLICT
    );
}
