//! Fehlertypen fuer den Fernruf-Client

use fernruf_protocol::ProtokollFehler;
use thiserror::Error;

/// Fehler der lokalen Medien-Schicht
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MedienFehler {
    #[error("Kamera/Mikrofon nicht verfuegbar: {0}")]
    Erfassung(String),

    #[error("Aushandlung fehlgeschlagen: {0}")]
    Aushandlung(String),

    #[error("Statistik nicht verfuegbar")]
    KeineStatistik,
}

/// Fehler des Anruf-Clients
#[derive(Debug, Error)]
pub enum AnrufFehler {
    #[error("Medienfehler: {0}")]
    Medien(#[from] MedienFehler),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtokollFehler),

    #[error("Anmeldung abgelehnt: {0}")]
    AnmeldungAbgelehnt(String),

    #[error("Verbindung zum Signaling-Server getrennt")]
    VerbindungGetrennt,

    #[error("Sitzung durch neuere Verbindung abgeloest")]
    Abgeloest,

    #[error("Anruf-Manager laeuft nicht mehr")]
    ManagerBeendet,
}

pub type AnrufResult<T> = Result<T, AnrufFehler>;
