//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer `ClientConnection`.
//! Nebenbei laufen die Presence-Verteilung und das Aufraeumen des
//! Rate-Limiters.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::broadcast::presence_verteilen;
use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// Intervall fuer das Aufraeumen inaktiver Rate-Limit-Buckets
const AUFRAEUM_INTERVALL: Duration = Duration::from_secs(60);

/// TCP-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
}

impl SignalingServer {
    /// Bindet den TCP-Socket
    pub async fn binden(state: Arc<SignalingState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse (Port 0 wird hier aufgeloest)
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(
        self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Signaling-Server gestartet");

        let verteiler = presence_verteilen(
            &self.state.registry,
            self.state.broadcaster.clone(),
            shutdown_rx.clone(),
        );
        let mut aufraeumen = tokio::time::interval(AUFRAEUM_INTERVALL);

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let platz = match self.state.verbindung_belegen() {
                                Some(p) => p,
                                None => {
                                    tracing::warn!(
                                        peer = %peer_addr,
                                        aktiv = self.state.aktive_verbindungen(),
                                        max = self.state.config.max_verbindungen,
                                        "Server voll – Verbindung abgelehnt"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }

                            let verbindung = ClientConnection::neu(
                                Arc::clone(&self.state),
                                peer_addr,
                                platz,
                            );
                            let shutdown_rx_clone = shutdown_rx.clone();
                            tokio::spawn(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                _ = aufraeumen.tick() => {
                    self.state.limiter.aufraeumen();
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        let _ = verteiler.await;
        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }
}
