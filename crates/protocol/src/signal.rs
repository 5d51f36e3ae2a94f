//! Signaling-Ereignisse (TCP, JSON)
//!
//! Definiert alle Ereignisse, die zwischen Client und Server ausgetauscht
//! werden, sowie das interne Relay-Modell `Signal`.
//!
//! ## Design
//! - Ereignisstil: `{"event": "<name>", "data": {...}}`
//! - Tagged Enums fuer typsichere Ereignisse, Pflichtfelder werden beim
//!   Dekodieren erzwungen und durch `validieren` weiter eingegrenzt
//! - Feldnamen in camelCase (`toUserId`, `fromName`, ...)

use fernruf_core::types::{Rolle, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ProtokollFehler, ProtokollResult};
use crate::medien::{
    AnrufMetadaten, IceKandidat, SdpTyp, SessionBeschreibung, MAX_KANDIDAT_BYTES, MAX_SDP_BYTES,
};

/// Maximale Laenge eines Beendigungsgrunds
pub const MAX_GRUND_BYTES: usize = 128;

/// Fehlertext fuer Anrufe an nicht erreichbare Identitaeten
pub const OFFLINE_MELDUNG: &str = "User is offline.";

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Anmeldung mit einem vom Identitaetsdienst ausgestellten Token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAnfrage {
    pub token: String,
}

/// Anruf starten (`call-user`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUser {
    pub to_user_id: UserId,
    /// Vom Client behauptete Absender-Identitaet (optional, wird geprueft)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    pub offer: SessionBeschreibung,
    #[serde(default)]
    pub metadata: AnrufMetadaten,
}

/// Anruf annehmen (`answer-call`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCall {
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    pub answer: SessionBeschreibung,
}

/// Trickle-Kandidat an einen Peer (`ice-candidate`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandidatAn {
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    pub candidate: IceKandidat,
}

/// Anruf beenden (`end-call`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallAn {
    pub to_user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
    pub reason: String,
}

/// Keepalive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Alle Ereignisse vom Client an den Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientSignal {
    #[serde(rename = "authenticate")]
    Authenticate(AuthAnfrage),
    #[serde(rename = "call-user")]
    CallUser(CallUser),
    #[serde(rename = "answer-call")]
    AnswerCall(AnswerCall),
    #[serde(rename = "ice-candidate")]
    IceCandidate(KandidatAn),
    #[serde(rename = "end-call")]
    EndCall(EndCallAn),
    #[serde(rename = "presence:refresh")]
    PresenceRefresh,
    #[serde(rename = "ping")]
    Ping(PingMessage),
    #[serde(rename = "pong")]
    Pong(PingMessage),
}

impl ClientSignal {
    /// Ereignisname wie auf dem Draht
    pub fn name(&self) -> &'static str {
        match self {
            ClientSignal::Authenticate(_) => "authenticate",
            ClientSignal::CallUser(_) => "call-user",
            ClientSignal::AnswerCall(_) => "answer-call",
            ClientSignal::IceCandidate(_) => "ice-candidate",
            ClientSignal::EndCall(_) => "end-call",
            ClientSignal::PresenceRefresh => "presence:refresh",
            ClientSignal::Ping(_) => "ping",
            ClientSignal::Pong(_) => "pong",
        }
    }

    /// Prueft Feldinhalte, die serde allein nicht abdeckt
    pub fn validieren(&self) -> ProtokollResult<()> {
        match self {
            ClientSignal::Authenticate(a) => {
                if a.token.trim().is_empty() {
                    return Err(ProtokollFehler::FeldFehlt("token"));
                }
                Ok(())
            }
            ClientSignal::CallUser(c) => sdp_pruefen(&c.offer, SdpTyp::Offer, "call-user"),
            ClientSignal::AnswerCall(a) => sdp_pruefen(&a.answer, SdpTyp::Answer, "answer-call"),
            ClientSignal::IceCandidate(k) => {
                groesse_pruefen("candidate", k.candidate.candidate.len(), MAX_KANDIDAT_BYTES)
            }
            ClientSignal::EndCall(e) => grund_pruefen(&e.reason),
            ClientSignal::PresenceRefresh | ClientSignal::Ping(_) | ClientSignal::Pong(_) => Ok(()),
        }
    }
}

fn sdp_pruefen(
    beschreibung: &SessionBeschreibung,
    erwartet: SdpTyp,
    ereignis: &'static str,
) -> ProtokollResult<()> {
    if beschreibung.typ != erwartet {
        return Err(ProtokollFehler::FalscherSdpTyp(ereignis));
    }
    if beschreibung.sdp.trim().is_empty() {
        return Err(ProtokollFehler::FeldFehlt("sdp"));
    }
    groesse_pruefen("sdp", beschreibung.sdp.len(), MAX_SDP_BYTES)
}

fn grund_pruefen(grund: &str) -> ProtokollResult<()> {
    if grund.trim().is_empty() {
        return Err(ProtokollFehler::FeldFehlt("reason"));
    }
    groesse_pruefen("reason", grund.len(), MAX_GRUND_BYTES)
}

fn groesse_pruefen(feld: &'static str, groesse: usize, maximum: usize) -> ProtokollResult<()> {
    if groesse > maximum {
        return Err(ProtokollFehler::ZuGross {
            feld,
            groesse,
            maximum,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Erfolgreiche Anmeldung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Angemeldet {
    pub user_id: UserId,
    pub name: String,
    pub role: Rolle,
}

/// Fehlgeschlagene Anmeldung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnmeldungAbgelehnt {
    pub message: String,
}

/// Eingehender Anruf (`incoming-call`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub from_user_id: UserId,
    pub from_name: String,
    pub offer: SessionBeschreibung,
    #[serde(default)]
    pub metadata: AnrufMetadaten,
}

/// Anruf nicht zustellbar (`call-error`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    pub to_user_id: UserId,
    pub message: String,
}

/// Anruf angenommen (`call-answered`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswered {
    pub from_user_id: UserId,
    pub answer: SessionBeschreibung,
}

/// Trickle-Kandidat von einem Peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandidatVon {
    pub from_user_id: UserId,
    pub candidate: IceKandidat,
}

/// Anruf vom Peer beendet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallVon {
    pub from_user_id: UserId,
    pub reason: String,
}

/// Presence hat sich geaendert, Clients holen den Status neu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatus {
    /// `None` bei einem reinen `presence:refresh`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_user_id: Option<UserId>,
}

/// Alle Ereignisse vom Server an den Client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerSignal {
    #[serde(rename = "authenticated")]
    Authenticated(Angemeldet),
    #[serde(rename = "auth-failed")]
    AuthFailed(AnmeldungAbgelehnt),
    #[serde(rename = "incoming-call")]
    IncomingCall(IncomingCall),
    #[serde(rename = "call-error")]
    CallError(CallError),
    #[serde(rename = "call-answered")]
    CallAnswered(CallAnswered),
    #[serde(rename = "ice-candidate")]
    IceCandidate(KandidatVon),
    #[serde(rename = "end-call")]
    EndCall(EndCallVon),
    #[serde(rename = "online-status")]
    OnlineStatus(OnlineStatus),
    /// Eine neuere Verbindung derselben Identitaet hat diese abgeloest
    #[serde(rename = "session-replaced")]
    SessionReplaced,
    #[serde(rename = "ping")]
    Ping(PingMessage),
    #[serde(rename = "pong")]
    Pong(PingMessage),
}

impl ServerSignal {
    /// Ereignisname wie auf dem Draht
    pub fn name(&self) -> &'static str {
        match self {
            ServerSignal::Authenticated(_) => "authenticated",
            ServerSignal::AuthFailed(_) => "auth-failed",
            ServerSignal::IncomingCall(_) => "incoming-call",
            ServerSignal::CallError(_) => "call-error",
            ServerSignal::CallAnswered(_) => "call-answered",
            ServerSignal::IceCandidate(_) => "ice-candidate",
            ServerSignal::EndCall(_) => "end-call",
            ServerSignal::OnlineStatus(_) => "online-status",
            ServerSignal::SessionReplaced => "session-replaced",
            ServerSignal::Ping(_) => "ping",
            ServerSignal::Pong(_) => "pong",
        }
    }

    pub fn offline(to_user_id: UserId) -> Self {
        ServerSignal::CallError(CallError {
            to_user_id,
            message: OFFLINE_MELDUNG.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Relay-Modell
// ---------------------------------------------------------------------------

/// Art eines weitergeleiteten Signals (fuer Logging und Metriken)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalArt {
    CallOffer,
    CallAnswer,
    IceCandidate,
    CallEnd,
    CallError,
}

impl SignalArt {
    pub fn als_str(&self) -> &'static str {
        match self {
            SignalArt::CallOffer => "call_offer",
            SignalArt::CallAnswer => "call_answer",
            SignalArt::IceCandidate => "ice_candidate",
            SignalArt::CallEnd => "call_end",
            SignalArt::CallError => "call_error",
        }
    }
}

/// Nutzlast eines Signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalInhalt {
    CallOffer {
        offer: SessionBeschreibung,
        metadata: AnrufMetadaten,
    },
    CallAnswer {
        answer: SessionBeschreibung,
    },
    IceCandidate {
        candidate: IceKandidat,
    },
    CallEnd {
        reason: String,
    },
    CallError {
        message: String,
    },
}

/// Ein Signal zwischen zwei Identitaeten
///
/// `von` ist immer die authentifizierte Identitaet der sendenden
/// Verbindung, nie ein vom Client behaupteter Wert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub von: UserId,
    pub an: UserId,
    pub inhalt: SignalInhalt,
}

/// Ergebnis der Umwandlung eines Client-Ereignisses in ein Signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Umwandlung {
    /// Weiterleitbares Signal
    Signal(Signal),
    /// Behaupteter Absender passt nicht zur authentifizierten Identitaet
    Gefaelscht { behauptet: UserId },
    /// Kein Relay-Ereignis (Auth, Presence, Keepalive)
    KeinSignal,
}

impl Signal {
    pub fn art(&self) -> SignalArt {
        match self.inhalt {
            SignalInhalt::CallOffer { .. } => SignalArt::CallOffer,
            SignalInhalt::CallAnswer { .. } => SignalArt::CallAnswer,
            SignalInhalt::IceCandidate { .. } => SignalArt::IceCandidate,
            SignalInhalt::CallEnd { .. } => SignalArt::CallEnd,
            SignalInhalt::CallError { .. } => SignalArt::CallError,
        }
    }

    /// Wandelt ein Client-Ereignis der Verbindung von `absender` um
    pub fn aus_client(signal: ClientSignal, absender: UserId) -> Umwandlung {
        let (behauptet, an, inhalt) = match signal {
            ClientSignal::CallUser(c) => (
                c.from_user_id,
                c.to_user_id,
                SignalInhalt::CallOffer {
                    offer: c.offer,
                    metadata: c.metadata,
                },
            ),
            ClientSignal::AnswerCall(a) => (
                a.from_user_id,
                a.to_user_id,
                SignalInhalt::CallAnswer { answer: a.answer },
            ),
            ClientSignal::IceCandidate(k) => (
                k.from_user_id,
                k.to_user_id,
                SignalInhalt::IceCandidate {
                    candidate: k.candidate,
                },
            ),
            ClientSignal::EndCall(e) => (
                e.from_user_id,
                e.to_user_id,
                SignalInhalt::CallEnd { reason: e.reason },
            ),
            ClientSignal::Authenticate(_)
            | ClientSignal::PresenceRefresh
            | ClientSignal::Ping(_)
            | ClientSignal::Pong(_) => return Umwandlung::KeinSignal,
        };

        match behauptet {
            Some(b) if b != absender => Umwandlung::Gefaelscht { behauptet: b },
            _ => Umwandlung::Signal(Signal {
                von: absender,
                an,
                inhalt,
            }),
        }
    }

    /// Server-Ereignis fuer den Empfaenger `an`
    pub fn zustellung(self, von_name: &str) -> ServerSignal {
        let von = self.von;
        match self.inhalt {
            SignalInhalt::CallOffer { offer, metadata } => {
                ServerSignal::IncomingCall(IncomingCall {
                    from_user_id: von,
                    from_name: von_name.to_string(),
                    offer,
                    metadata,
                })
            }
            SignalInhalt::CallAnswer { answer } => ServerSignal::CallAnswered(CallAnswered {
                from_user_id: von,
                answer,
            }),
            SignalInhalt::IceCandidate { candidate } => ServerSignal::IceCandidate(KandidatVon {
                from_user_id: von,
                candidate,
            }),
            SignalInhalt::CallEnd { reason } => ServerSignal::EndCall(EndCallVon {
                from_user_id: von,
                reason,
            }),
            SignalInhalt::CallError { message } => ServerSignal::CallError(CallError {
                to_user_id: von,
                message,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
