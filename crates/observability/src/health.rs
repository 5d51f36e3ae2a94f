//! Health-Check-Endpunkt fuer Fernruf
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl gebundener Verbindungen

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::FernrufMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Server faehrt herunter und nimmt keine neuen Verbindungen mehr an
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub online_connections: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    bereit: Arc<AtomicBool>,
    metriken: FernrufMetrics,
}

impl HealthState {
    pub fn neu(metriken: FernrufMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            bereit: Arc::new(AtomicBool::new(true)),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn ist_bereit(&self) -> bool {
        self.bereit.load(Ordering::Relaxed)
    }

    /// Markiert den Server als herunterfahrend
    pub fn herunterfahren(&self) {
        self.bereit.store(false, Ordering::Relaxed);
    }

    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: if self.ist_bereit() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            online_connections: self.metriken.online_verbindungen.get(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    // 200 auch bei degraded, die Probe soll nicht failen
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> HealthState {
        HealthState::neu(FernrufMetrics::neu().unwrap())
    }

    #[test]
    fn frisch_erstellt_ist_bereit() {
        let s = state();
        assert!(s.uptime_seconds() < 5);
        assert!(s.ist_bereit());
        assert_eq!(s.antwort().status, HealthStatus::Healthy);
    }

    #[test]
    fn herunterfahren_meldet_degraded() {
        let s = state();
        s.herunterfahren();
        assert_eq!(s.antwort().status, HealthStatus::Degraded);
    }

    #[test]
    fn online_verbindungen_aus_metriken() {
        let metriken = FernrufMetrics::neu().unwrap();
        let s = HealthState::neu(metriken.clone());
        metriken.online_verbindungen.set(3);
        assert_eq!(s.antwort().online_connections, 3);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            online_connections: 2,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"online_connections\":2"));
    }
}
