//! Fehlertypen fuer den Signaling-Service

use fernruf_protocol::ProtokollFehler;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Token wurde vom Identitaetsdienst abgelehnt
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Auth(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Nachricht nicht dekodierbar oder ungueltig
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtokollFehler),

    /// Erste Nachricht war kein `authenticate`
    #[error("Nicht authentifiziert")]
    NichtAuthentifiziert,

    /// `authenticate` kam nicht rechtzeitig
    #[error("Timeout")]
    Timeout,
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
