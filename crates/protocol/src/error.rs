//! Fehlertypen fuer das Signaling-Protokoll

use thiserror::Error;

/// Fehler bei Dekodierung oder Validierung einer Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtokollFehler {
    /// Frame war kein gueltiges JSON fuer den erwarteten Nachrichtentyp
    #[error("Ungueltiges Nachrichtenformat: {0}")]
    Format(String),

    /// Pflichtfeld fehlt oder ist leer
    #[error("Pflichtfeld fehlt oder leer: {0}")]
    FeldFehlt(&'static str),

    /// Feld ueberschreitet die erlaubte Groesse
    #[error("Feld zu gross: {feld} ({groesse} Bytes, Maximum {maximum})")]
    ZuGross {
        feld: &'static str,
        groesse: usize,
        maximum: usize,
    },

    /// Session-Beschreibung hat den falschen Typ fuer dieses Ereignis
    #[error("Falscher SDP-Typ fuer {0}")]
    FalscherSdpTyp(&'static str),
}

/// Result-Typ fuer das Protokoll
pub type ProtokollResult<T> = Result<T, ProtokollFehler>;
