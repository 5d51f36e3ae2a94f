//! Message-Dispatcher – Routet Client-Ereignisse nach dem Handshake
//!
//! Der Dispatcher ist der einzige Verteilpunkt fuer Ereignisse einer
//! authentifizierten Verbindung. Relay-Ereignisse gehen an den
//! `SignalingRelay`, dessen Antworten (z.B. `call-error`) ueber die
//! Send-Queue laufen. Direkte Antworten (Pong) gibt `dispatch` zurueck.

use fernruf_core::types::{Identitaet, VerbindungsId};
use fernruf_protocol::signal::{ClientSignal, PingMessage, ServerSignal};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    pub peer_addr: SocketAddr,
    pub verbindung: VerbindungsId,
    /// Beim Handshake authentifizierte Identitaet
    pub identitaet: Identitaet,
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet ein eingehendes Ereignis und gibt die direkte Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll.
    pub fn dispatch(&self, nachricht: ClientSignal, ctx: &DispatcherContext) -> Option<ServerSignal> {
        match nachricht {
            ClientSignal::Authenticate(_) => {
                tracing::warn!(
                    user_id = %ctx.identitaet.id,
                    verbindung = %ctx.verbindung,
                    "authenticate auf bereits authentifizierter Verbindung ignoriert"
                );
                None
            }

            ClientSignal::Ping(ping) => Some(ServerSignal::Pong(PingMessage {
                timestamp_ms: ping.timestamp_ms,
            })),

            ClientSignal::Pong(_) => {
                tracing::trace!(verbindung = %ctx.verbindung, "Pong empfangen");
                None
            }

            ClientSignal::PresenceRefresh => {
                self.state.relay.presence_auffrischen(&ctx.identitaet);
                None
            }

            relay_ereignis @ (ClientSignal::CallUser(_)
            | ClientSignal::AnswerCall(_)
            | ClientSignal::IceCandidate(_)
            | ClientSignal::EndCall(_)) => {
                self.state
                    .relay
                    .weiterleiten(&ctx.identitaet, ctx.verbindung, relay_ereignis);
                None
            }
        }
    }
}
