//! Ereignisse fuer die Oberflaeche

use fernruf_core::types::UserId;

/// Oeffentlicher Zustand einer Anruf-Sitzung
///
/// `Idle` hat keinen eigenen Wert: ohne Sitzung gibt es keinen Zustand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufZustand {
    /// Angebot gesendet, Antwort steht aus
    Anbieten,
    /// Angebot empfangen, Nutzer hat noch nicht entschieden
    EingehendAngeboten,
    /// Angenommen, Antwort wird erzeugt
    Antworten,
    Verbunden,
    Wiederverbinden,
}

impl std::fmt::Display for AnrufZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Anbieten => "offering",
            Self::EingehendAngeboten => "incoming-offered",
            Self::Antworten => "answering",
            Self::Verbunden => "connected",
            Self::Wiederverbinden => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Ereignis des `AnrufManager`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnrufEreignis {
    /// Eingehender Anruf wartet auf `annehmen`/`ablehnen`
    EingehenderAnruf {
        von: UserId,
        name: String,
        video: bool,
    },
    ZustandGeaendert {
        peer: UserId,
        zustand: AnrufZustand,
    },
    /// Lokale Medien nicht verfuegbar, Sitzung laeuft nur empfangend
    NurEmpfang { peer: UserId },
    QualitaetGeaendert { peer: UserId, stufe: u8 },
    /// Darstellungsflaeche der Gegenstelle entfernen
    OberflaecheEntfernt { peer: UserId },
    Beendet { peer: UserId, grund: String },
    /// Presence hat sich geaendert, Verzeichnis neu abfragen
    PresenceGeaendert { geaendert: Option<UserId> },
    /// Eine neuere Verbindung derselben Identitaet hat uebernommen
    SitzungAbgeloest,
}
