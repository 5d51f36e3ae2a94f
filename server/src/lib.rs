//! fernruf-server – Bibliotheks-Root
//!
//! Verdrahtet Signaling, HTTP-API und Observability zu einem Prozess.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use config::ServerConfig;
use fernruf_api::ice::{HttpIceQuelle, IceCache, IceQuelle, StatischeIceQuelle};
use fernruf_api::ApiState;
use fernruf_observability::{FernrufMetrics, HealthState};
use fernruf_signaling::{SignalingServer, SignalingState, StatischeBenutzer};
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis `shutdown_rx` ein `true` meldet
    ///
    /// Reihenfolge:
    /// 1. Metriken und Token-Tabelle
    /// 2. TCP-Signaling binden
    /// 3. HTTP-API (Verzeichnis, ICE, Health, Metriken) starten
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let config = self.config;
        let tcp_adresse = config.tcp_bind_adresse()?;
        let http_adresse = config.http_bind_adresse()?;

        tracing::info!(
            server_name = %config.server.name,
            tcp = %tcp_adresse,
            http = %http_adresse,
            benutzer = config.benutzer.len(),
            "Server startet"
        );
        if config.benutzer.is_empty() {
            tracing::warn!("Keine Benutzer konfiguriert, jede Anmeldung wird abgelehnt");
        }

        let metriken = FernrufMetrics::neu()?;
        let benutzer = Arc::new(StatischeBenutzer::neu(config.benutzer_tabelle()));

        let state = SignalingState::neu(
            config.signaling_config(),
            benutzer.clone(),
            metriken.clone(),
        );
        let signaling = SignalingServer::binden(Arc::clone(&state), tcp_adresse).await?;
        let signaling_task = tokio::spawn(signaling.starten(shutdown_rx.clone()));

        let quelle: Arc<dyn IceQuelle> = match &config.ice.upstream_url {
            Some(url) => Arc::new(HttpIceQuelle::neu(
                url.clone(),
                std::time::Duration::from_secs(config.ice.upstream_timeout_sek),
            )?),
            None => Arc::new(StatischeIceQuelle::neu(config.ice.server.clone())),
        };
        let api_state = ApiState {
            authentifizierer: benutzer.clone(),
            verzeichnis: benutzer,
            registry: state.registry.clone(),
            ice: IceCache::neu(quelle, config.ice_cache_dauer()),
        };

        let health = HealthState::neu(metriken.clone());
        let app = fernruf_api::router(
            api_state,
            health.clone(),
            metriken,
            &config.netzwerk.cors_origins,
        );

        let mut health_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            while health_rx.changed().await.is_ok() {
                if *health_rx.borrow() {
                    health.herunterfahren();
                    break;
                }
            }
        });

        fernruf_api::starten(app, http_adresse, shutdown_rx).await?;

        match signaling_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(fehler = %e, "Signaling-Server mit Fehler beendet"),
            Err(e) => tracing::error!(fehler = %e, "Signaling-Task abgebrochen"),
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn server_startet_und_stoppt() {
        let mut config = ServerConfig::default();
        config.netzwerk.bind_adresse = "127.0.0.1".into();
        config.netzwerk.tcp_port = 0;
        config.netzwerk.http_port = 0;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Server::neu(config).starten(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let ergebnis = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Server stoppt nicht")
            .unwrap();
        assert!(ergebnis.is_ok());
    }
}
