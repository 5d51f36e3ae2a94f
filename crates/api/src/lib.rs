//! fernruf-api – HTTP-Schnittstellen neben dem Signaling
//!
//! | Route              | Inhalt                                          |
//! |--------------------|-------------------------------------------------|
//! | `GET /users/online`| Identitaeten der Gegenrolle mit Online-Status   |
//! | `GET /ice`         | STUN/TURN-Liste (gecacht)                       |
//! | `GET /health`      | Serverstatus                                    |
//! | `GET /metrics`     | Prometheus-Export                               |
//!
//! `/users/online` und `/ice` verlangen `Authorization: Bearer <token>`,
//! dasselbe Token wie beim `authenticate` auf der Signaling-Verbindung.

pub mod error;
pub mod ice;
pub mod verzeichnis;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, Method};
use axum::{middleware, routing::get, Router};
use fernruf_core::types::Identitaet;
use fernruf_observability::{
    health_router, metrics_router, request_timing_layer, timing_middleware, FernrufMetrics,
    HealthState,
};
use fernruf_signaling::{AuthFehler, Authentifizierer, Benutzerverzeichnis, PresenceRegistry};
use tower_http::cors::CorsLayer;

pub use error::{ApiError, ApiResult};
pub use ice::{HttpIceQuelle, IceAntwort, IceCache, IceQuelle, StatischeIceQuelle};
pub use verzeichnis::BenutzerStatus;

/// Axum-State der HTTP-Schnittstellen
#[derive(Clone)]
pub struct ApiState {
    pub authentifizierer: Arc<dyn Authentifizierer>,
    pub verzeichnis: Arc<dyn Benutzerverzeichnis>,
    /// Dieselbe Registry wie im Signaling-Server
    pub registry: PresenceRegistry,
    pub ice: IceCache,
}

/// Prueft das Bearer-Token aus den Request-Headern
pub async fn identitaet_aus_headers(
    headers: &HeaderMap,
    state: &ApiState,
) -> ApiResult<Identitaet> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(ApiError::HeaderFehlt)?;

    state
        .authentifizierer
        .pruefen(token)
        .await
        .map_err(|e| match e {
            AuthFehler::UngueltigesToken => ApiError::UngueltigesToken,
            AuthFehler::NichtErreichbar(grund) => ApiError::DienstNichtErreichbar(grund),
        })
}

/// Baut den vollstaendigen Router
///
/// `cors_origins` leer = alle Origins erlaubt (nur fuer Entwicklung).
pub fn router(
    state: ApiState,
    health: HealthState,
    metriken: FernrufMetrics,
    cors_origins: &[String],
) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/users/online", get(verzeichnis::online_handler))
        .route("/ice", get(ice::ice_handler))
        .with_state(state)
        .merge(health_router(health))
        .merge(metrics_router(metriken.clone()))
        .layer(middleware::from_fn_with_state(metriken, timing_middleware))
        .layer(request_timing_layer())
        .layer(cors)
}

/// Startet den HTTP-Server bis `shutdown_rx` ein `true` meldet
pub async fn starten(
    app: Router,
    bind_addr: SocketAddr,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(adresse = %listener.local_addr()?, "HTTP-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("HTTP-Server gestoppt");
    Ok(())
}
