//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task.
//!
//! ## Ablauf
//! ```text
//! Verbunden --authenticate--> Authentifiziert (gebunden) --> Getrennt
//!     |                            |
//!     +--auth-failed/Timeout-------+--> Getrennt (Registry unbind)
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Ist `verbindungs_timeout_sek` lang nichts angekommen, wird getrennt
//!
//! ## Abloesung
//! Bindet sich dieselbe Identitaet ueber eine neue Verbindung, wird die alte
//! ueber ihr Abloese-Signal im Broadcaster geweckt, schreibt
//! `session-replaced` direkt auf den Socket und beendet sich.

use futures_util::{SinkExt, StreamExt};
use fernruf_core::types::{Identitaet, VerbindungsId};
use fernruf_protocol::{
    signal::{Angemeldet, AnmeldungAbgelehnt, ClientSignal, PingMessage, ServerSignal},
    wire::ServerCodec,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::{SignalingState, VerbindungsPlatz};

type ServerFramed = Framed<TcpStream, ServerCodec>;

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    verbindung: VerbindungsId,
    _platz: VerbindungsPlatz,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr, platz: VerbindungsPlatz) -> Self {
        Self {
            state,
            peer_addr,
            verbindung: VerbindungsId::naechste(),
            _platz: platz,
        }
    }

    pub fn verbindung(&self) -> VerbindungsId {
        self.verbindung
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt, abgeloest oder der Server
    /// heruntergefahren wird.
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        let verbindung = self.verbindung;
        let config = Arc::clone(&self.state.config);

        tracing::info!(peer = %peer_addr, verbindung = %verbindung, "Neue Verbindung");

        let mut framed = Framed::new(
            stream,
            ServerCodec::with_max_size(config.max_frame_groesse),
        );

        // Handshake
        let handshake_dauer = Duration::from_secs(config.handshake_timeout_sek);
        let identitaet = tokio::select! {
            ergebnis = tokio::time::timeout(handshake_dauer, self.handshake(&mut framed)) => {
                match ergebnis.unwrap_or(Err(SignalingError::Timeout)) {
                    Ok(identitaet) => identitaet,
                    Err(e) => {
                        tracing::info!(peer = %peer_addr, fehler = %e, "Handshake fehlgeschlagen");
                        return;
                    }
                }
            }
            Ok(()) = shutdown_rx.changed() => return,
        };

        // Erst binden, dann bestaetigen: nach `authenticated` ist die
        // Identitaet erreichbar
        let mut sende_rx = self.state.broadcaster.verbindung_registrieren(verbindung);
        let mut abgeloest_rx = self
            .state
            .broadcaster
            .abloesung_abonnieren(&verbindung)
            .unwrap_or_else(|| watch::channel(false).1);
        if let Some(alt) = self.state.registry.bind(identitaet.clone(), verbindung) {
            self.state.broadcaster.abloesen(&alt);
        }
        self.state.online_metrik_aktualisieren();

        let angemeldet = ServerSignal::Authenticated(Angemeldet {
            user_id: identitaet.id,
            name: identitaet.name.clone(),
            role: identitaet.rolle,
        });
        let ctx = DispatcherContext {
            peer_addr,
            verbindung,
            identitaet,
        };

        match framed.send(angemeldet).await {
            Ok(()) => {
                let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
                let mut kanaele = Kanaele {
                    sende_rx: &mut sende_rx,
                    abgeloest_rx: &mut abgeloest_rx,
                    shutdown_rx: &mut shutdown_rx,
                };
                self.schleife(&mut framed, &mut kanaele, &dispatcher, &ctx).await;
            }
            Err(e) => {
                tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
            }
        }

        // Cleanup beim Verbindungsende
        self.state.broadcaster.verbindung_entfernen(&verbindung);
        self.state.registry.unbind(verbindung);
        self.state.online_metrik_aktualisieren();

        tracing::info!(
            peer = %peer_addr,
            user_id = %ctx.identitaet.id,
            verbindung = %verbindung,
            "Verbindungs-Task beendet"
        );
    }

    /// Erwartet `authenticate` als erstes Ereignis und prueft das Token
    async fn handshake(&self, framed: &mut ServerFramed) -> SignalingResult<Identitaet> {
        let token = match framed.next().await {
            Some(Ok(Ok(ClientSignal::Authenticate(anfrage)))) => anfrage.token,
            Some(Ok(Ok(andere))) => {
                abweisen(framed, "authenticate erwartet").await;
                tracing::debug!(event = andere.name(), "Ereignis vor authenticate");
                return Err(SignalingError::NichtAuthentifiziert);
            }
            Some(Ok(Err(fehler))) => {
                abweisen(framed, "Ungueltige Nachricht").await;
                return Err(fehler.into());
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SignalingError::VerbindungGetrennt),
        };

        match self.state.authentifizierer.pruefen(&token).await {
            Ok(identitaet) => {
                tracing::info!(
                    peer = %self.peer_addr,
                    user_id = %identitaet.id,
                    rolle = %identitaet.rolle,
                    "Verbindung authentifiziert"
                );
                Ok(identitaet)
            }
            Err(e) => {
                abweisen(framed, &e.to_string()).await;
                Err(SignalingError::Auth(e.to_string()))
            }
        }
    }

    /// Haupt-Schleife einer authentifizierten Verbindung
    async fn schleife(
        &self,
        framed: &mut ServerFramed,
        kanaele: &mut Kanaele<'_>,
        dispatcher: &MessageDispatcher,
        ctx: &DispatcherContext,
    ) {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;

        loop {
            if *kanaele.abgeloest_rx.borrow() {
                if let Err(e) = framed.send(ServerSignal::SessionReplaced).await {
                    tracing::debug!(peer = %peer_addr, fehler = %e, "session-replaced nicht gesendet");
                }
                tracing::info!(
                    peer = %peer_addr,
                    user_id = %ctx.identitaet.id,
                    "Durch neuere Verbindung abgeloest"
                );
                break;
            }
            if Instant::now().duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, user_id = %ctx.identitaet.id, "Verbindungs-Timeout");
                break;
            }

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Ok(nachricht))) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(peer = %peer_addr, event = nachricht.name(), "Nachricht empfangen");

                            if let Some(antwort) = dispatcher.dispatch(nachricht, ctx) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                        }
                        Some(Ok(Err(fehler))) => {
                            // Stream bleibt synchron, nur dieses Ereignis verwerfen
                            letzter_empfang = Instant::now();
                            self.state.metriken.verworfen("malformed");
                            tracing::warn!(
                                peer = %peer_addr,
                                user_id = %ctx.identitaet.id,
                                fehler = %fehler,
                                "Ungueltige Nachricht verworfen"
                            );
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus dem Broadcaster
                Some(ausgehend) = kanaele.sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Broadcast-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Abloesung, wird oben in der Schleife behandelt
                Ok(()) = kanaele.abgeloest_rx.changed() => {}

                // Keepalive-Ping
                _ = tokio::time::sleep_until(naechster_ping) => {
                    let ping = ServerSignal::Ping(PingMessage { timestamp_ms: jetzt_ms() });
                    if let Err(e) = framed.send(ping).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                        break;
                    }
                    naechster_ping = Instant::now() + keepalive_intervall;
                }

                // Shutdown-Signal
                Ok(()) = kanaele.shutdown_rx.changed() => {
                    if *kanaele.shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        break;
                    }
                }
            }
        }
    }
}

/// Empfangsseiten, die die Haupt-Schleife neben dem Socket abhoert
struct Kanaele<'a> {
    sende_rx: &'a mut mpsc::Receiver<ServerSignal>,
    abgeloest_rx: &'a mut watch::Receiver<bool>,
    shutdown_rx: &'a mut watch::Receiver<bool>,
}

async fn abweisen(framed: &mut ServerFramed, meldung: &str) {
    let _ = framed
        .send(ServerSignal::AuthFailed(AnmeldungAbgelehnt {
            message: meldung.to_string(),
        }))
        .await;
}

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
