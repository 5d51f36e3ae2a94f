//! Signaling-Client – TCP-Verbindung zum Fernruf-Server
//!
//! Meldet sich mit einem Token an und verbindet danach die Verbindung mit
//! einem `AnrufManager`: eingehende `ServerSignal`s gehen an die
//! `AnrufSteuerung`, ausgehende `ClientSignal`s des Managers auf den Draht.
//! Keepalive-Pings des Servers beantwortet der Client selbst.

use fernruf_core::types::Identitaet;
use fernruf_protocol::signal::{AuthAnfrage, ClientSignal, ServerSignal};
use fernruf_protocol::wire::ClientCodec;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::anruf::AnrufSteuerung;
use crate::error::{AnrufFehler, AnrufResult};

/// Zeit fuer die Antwort auf `authenticate`
const ANMELDE_TIMEOUT: Duration = Duration::from_secs(10);

/// Angemeldete Verbindung zum Signaling-Server
pub struct SignalingClient {
    framed: Framed<TcpStream, ClientCodec>,
    identitaet: Identitaet,
}

impl SignalingClient {
    /// Verbindet und meldet sich mit `token` an
    pub async fn verbinden(addr: impl ToSocketAddrs, token: &str) -> AnrufResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(fehler = %e, "TCP_NODELAY nicht gesetzt");
        }
        let mut framed = Framed::new(stream, ClientCodec::new());

        framed
            .send(ClientSignal::Authenticate(AuthAnfrage {
                token: token.to_string(),
            }))
            .await?;

        let identitaet = tokio::time::timeout(ANMELDE_TIMEOUT, anmeldung_abwarten(&mut framed))
            .await
            .map_err(|_| AnrufFehler::VerbindungGetrennt)??;

        tracing::info!(
            user_id = %identitaet.id,
            rolle = %identitaet.rolle,
            "Am Signaling-Server angemeldet"
        );
        Ok(Self { framed, identitaet })
    }

    /// Vom Server bestaetigte Identitaet
    pub fn identitaet(&self) -> &Identitaet {
        &self.identitaet
    }

    /// Pumpt Signale zwischen Server und Manager
    ///
    /// Endet mit `Ok(())`, wenn der Manager keine Signale mehr senden kann,
    /// sonst mit dem Grund fuer das Verbindungsende.
    pub async fn betreiben(
        mut self,
        steuerung: AnrufSteuerung,
        mut ausgang: mpsc::UnboundedReceiver<ClientSignal>,
    ) -> AnrufResult<()> {
        loop {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(Ok(ServerSignal::Ping(ping)))) => {
                        self.framed.send(ClientSignal::Pong(ping)).await?;
                    }
                    Some(Ok(Ok(ServerSignal::Pong(_)))) => {}
                    Some(Ok(Ok(ServerSignal::SessionReplaced))) => {
                        tracing::warn!(user_id = %self.identitaet.id, "Durch neuere Verbindung abgeloest");
                        steuerung.signal_empfangen(ServerSignal::SessionReplaced)?;
                        return Err(AnrufFehler::Abgeloest);
                    }
                    Some(Ok(Ok(signal))) => {
                        tracing::trace!(event = signal.name(), "Signal empfangen");
                        steuerung.signal_empfangen(signal)?;
                    }
                    Some(Ok(Err(fehler))) => {
                        tracing::warn!(fehler = %fehler, "Ungueltiges Ereignis vom Server verworfen");
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("Signaling-Server hat die Verbindung geschlossen");
                        return Err(AnrufFehler::VerbindungGetrennt);
                    }
                },

                ausgehend = ausgang.recv() => match ausgehend {
                    Some(signal) => {
                        tracing::trace!(event = signal.name(), "Signal gesendet");
                        self.framed.send(signal).await?;
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}

async fn anmeldung_abwarten(framed: &mut Framed<TcpStream, ClientCodec>) -> AnrufResult<Identitaet> {
    loop {
        match framed.next().await {
            Some(Ok(Ok(ServerSignal::Authenticated(a)))) => {
                return Ok(Identitaet::neu(a.user_id, a.name, a.role));
            }
            Some(Ok(Ok(ServerSignal::AuthFailed(abgelehnt)))) => {
                return Err(AnrufFehler::AnmeldungAbgelehnt(abgelehnt.message));
            }
            // Presence-Rauschen vor der Bestaetigung
            Some(Ok(Ok(_))) => continue,
            Some(Ok(Err(fehler))) => return Err(fehler.into()),
            Some(Err(e)) => return Err(e.into()),
            None => return Err(AnrufFehler::VerbindungGetrennt),
        }
    }
}
