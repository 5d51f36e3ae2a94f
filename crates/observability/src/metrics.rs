//! Prometheus-kompatible Metriken fuer Fernruf
//!
//! Registrierte Metriken:
//! - `fernruf_online_connections` – Gauge: Aktuell gebundene Verbindungen
//! - `fernruf_signals_relayed_total` – Counter: Weitergeleitete Signale (art)
//! - `fernruf_signals_dropped_total` – Counter: Verworfene Signale (grund)
//! - `fernruf_call_offline_errors_total` – Counter: `call-error` wegen offline
//! - `fernruf_signals_rate_limited_total` – Counter: Durch Rate-Limit verworfen
//! - `fernruf_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `fernruf_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Fernruf-Prometheus-Metriken
#[derive(Clone)]
pub struct FernrufMetrics {
    pub registry: Arc<Registry>,

    // Signaling
    pub online_verbindungen: IntGauge,
    pub signale_weitergeleitet: IntCounterVec,
    pub signale_verworfen: IntCounterVec,
    pub offline_fehler: IntCounter,
    pub rate_limitiert: IntCounter,

    // HTTP
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl FernrufMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let online_verbindungen = IntGauge::with_opts(Opts::new(
            "fernruf_online_connections",
            "Anzahl aktuell gebundener Signaling-Verbindungen",
        ))?;
        registry.register(Box::new(online_verbindungen.clone()))?;

        let signale_weitergeleitet = IntCounterVec::new(
            Opts::new(
                "fernruf_signals_relayed_total",
                "Weitergeleitete Signale nach Art",
            ),
            &["art"],
        )?;
        registry.register(Box::new(signale_weitergeleitet.clone()))?;

        let signale_verworfen = IntCounterVec::new(
            Opts::new(
                "fernruf_signals_dropped_total",
                "Verworfene Signale nach Grund",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(signale_verworfen.clone()))?;

        let offline_fehler = IntCounter::with_opts(Opts::new(
            "fernruf_call_offline_errors_total",
            "Anrufversuche an nicht erreichbare Identitaeten",
        ))?;
        registry.register(Box::new(offline_fehler.clone()))?;

        let rate_limitiert = IntCounter::with_opts(Opts::new(
            "fernruf_signals_rate_limited_total",
            "Durch das Rate-Limit verworfene Signale",
        ))?;
        registry.register(Box::new(rate_limitiert.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("fernruf_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fernruf_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            online_verbindungen,
            signale_weitergeleitet,
            signale_verworfen,
            offline_fehler,
            rate_limitiert,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Zaehlt ein weitergeleitetes Signal
    pub fn weitergeleitet(&self, art: &str) {
        self.signale_weitergeleitet.with_label_values(&[art]).inc();
    }

    /// Zaehlt ein verworfenes Signal
    pub fn verworfen(&self, grund: &str) {
        self.signale_verworfen.with_label_values(&[grund]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: FernrufMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<FernrufMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
