use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::middleware as axum_middleware;
use axum::Router;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use log::{info, warn};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use reclamoserver::auth;
use reclamoserver::auth::middleware::{requerir_admin, requerir_sesion};
use reclamoserver::chatbots;
use reclamoserver::config::AppConfig;
use reclamoserver::llm::provider_from_env;
use reclamoserver::notificaciones::Mailer;
use reclamoserver::shared::state::AppState;
use reclamoserver::shared::utils::create_conn;
use reclamoserver::whatsapp::memoria::{MemoriaConversaciones, INTERVALO_BARRIDO};
use reclamoserver::{
    asesores, asistente, dashboard, reclamos, sedes, suscripciones, tenants, usuarios, whatsapp,
};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

// Tope para superficies que solo tocan la base de datos. El webhook de
// WhatsApp y el chat del asistente tienen plazos propios mas largos.
const TIMEOUT_REQUEST: Duration = Duration::from_secs(15);
const DRENAJE_MAXIMO: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(AppConfig::from_env()?);
    reclamoserver::planes::configurar_bypass(config.server.is_development());
    let pool = create_conn(&config.database)?;

    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migraciones: {e}"))?;
    }

    let llm = provider_from_env(&config.ai, config.ai_fallback.as_ref());
    info!("proveedor de IA activo: {}", llm.name());

    let mailer = match &config.smtp {
        Some(cfg) => match Mailer::new(cfg) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                warn!("SMTP deshabilitado: {e}");
                None
            }
        },
        None => {
            info!("SMTP no configurado, correos deshabilitados");
            None
        }
    };

    let memoria = Arc::new(MemoriaConversaciones::new());
    {
        let memoria = memoria.clone();
        tokio::spawn(async move {
            let mut intervalo = tokio::time::interval(INTERVALO_BARRIDO);
            loop {
                intervalo.tick().await;
                let barridas = memoria.barrer_expiradas();
                if barridas > 0 {
                    info!("memoria de conversaciones: {} expiradas", barridas);
                }
            }
        });
    }

    let state = AppState::new(pool, config.clone(), llm, memoria, mailer);

    let app = armar_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("escuchando en {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let servidor = async {
        axum::serve(listener, app)
            .with_graceful_shutdown(apagado())
            .await
    };
    // Tras la señal, las conexiones en vuelo tienen DRENAJE_MAXIMO para
    // terminar; despues el proceso cae igual.
    let drenaje_vencido = async {
        senal_apagado().await;
        tokio::time::sleep(DRENAJE_MAXIMO).await;
    };
    tokio::select! {
        resultado = servidor => resultado?,
        _ = drenaje_vencido => {
            warn!("drenaje incompleto tras {}s, cerrando", DRENAJE_MAXIMO.as_secs());
        }
    }
    info!("servidor detenido");
    Ok(())
}

fn armar_router(state: AppState) -> Router {
    // Rutas que exigen ADMIN ademas de sesion.
    let solo_admin = Router::new()
        .merge(usuarios::router())
        .merge(chatbots::router())
        .merge(whatsapp::canales::router())
        .route_layer(axum_middleware::from_fn(requerir_admin));

    let protegido = Router::new()
        .merge(tenants::router())
        .merge(sedes::router())
        .merge(suscripciones::router())
        .merge(reclamos::router())
        .merge(asesores::router())
        .merge(asistente::router())
        .merge(dashboard::router())
        .merge(solo_admin)
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            requerir_sesion,
        ));

    let api_v1 = Router::new()
        .nest("/auth", auth::router(state.clone()))
        .merge(protegido);

    let portal = reclamos::publico::router().layer(TimeoutLayer::new(TIMEOUT_REQUEST));
    let bot_api =
        chatbots::bot_api::router(state.clone()).layer(TimeoutLayer::new(TIMEOUT_REQUEST));

    Router::new()
        .merge(portal)
        .merge(whatsapp::router())
        .nest("/api/v1", api_v1)
        .nest("/api/bot/v1", bot_api)
        .layer(capa_cors(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn capa_cors(state: &AppState) -> CorsLayer {
    let origenes = &state.config.cors_allowed_origins;
    let capa = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));
    if origenes.iter().any(|o| o == "*") {
        capa.allow_origin(Any)
    } else {
        let valores: Vec<HeaderValue> = origenes
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        capa.allow_origin(valores)
    }
}

async fn apagado() {
    senal_apagado().await;
    info!("señal de apagado recibida, drenando conexiones");
}

async fn senal_apagado() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("no se pudo instalar el handler de Ctrl+C");
    };

    #[cfg(unix)]
    let terminar = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("no se pudo instalar el handler de SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminar = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminar => {},
    }
}
