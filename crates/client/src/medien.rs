//! Schnittstelle zur Peer-Medien-Schicht
//!
//! Verschluesselung, Paketierung und Jitter-Buffer liegen in der
//! Medien-Schicht des Endgeraets. Fernruf steuert sie nur ueber
//! `MedienSitzung` und bekommt Transport-Ereignisse ueber den
//! `TransportMelder` zurueck.

use async_trait::async_trait;
use fernruf_core::types::UserId;
use fernruf_protocol::medien::{IceKandidat, SessionBeschreibung};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::anruf::Befehl;
use crate::error::MedienFehler;

/// Verbindungszustand der Transportschicht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportZustand {
    Verbindet,
    Verbunden,
    /// Kurzzeitig keine Konnektivitaet, kann sich selbst erholen
    Unterbrochen,
    Fehlgeschlagen,
    Geschlossen,
}

/// Momentaufnahme der Transportstatistik
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistik {
    pub rtt: Option<Duration>,
    /// Anteil verlorener eingehender Pakete (0..1)
    pub verlust: f64,
    /// Empfangene Bildrate, `None` ohne Video
    pub fps: Option<f64>,
}

/// Obergrenzen fuer die ausgehenden Encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kodierung {
    pub max_bitrate_kbps: u32,
    pub max_fps: u32,
}

/// Ausgehandelte Peer-Medien-Sitzung (eine pro Gegenstelle)
#[async_trait]
pub trait MedienSitzung: Send + Sync + 'static {
    /// Kamera/Mikrofon erfassen und an die Sitzung haengen
    async fn lokale_medien_anhaengen(&self, video: bool) -> Result<(), MedienFehler>;

    /// Stellt pro Medienart einen reinen Empfangs-Transceiver sicher
    async fn empfangs_transceiver_sicherstellen(&self, video: bool) -> Result<(), MedienFehler>;

    /// Erzeugt ein Angebot und setzt es als lokale Beschreibung
    async fn angebot_erzeugen(&self, ice_neustart: bool)
        -> Result<SessionBeschreibung, MedienFehler>;

    /// Erzeugt eine Antwort und setzt sie als lokale Beschreibung
    async fn antwort_erzeugen(&self) -> Result<SessionBeschreibung, MedienFehler>;

    /// Ein Angebot bei offenem eigenem Angebot verwirft das eigene
    /// (implizites Rollback)
    async fn remote_beschreibung_setzen(
        &self,
        beschreibung: SessionBeschreibung,
    ) -> Result<(), MedienFehler>;

    async fn kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> Result<(), MedienFehler>;

    async fn statistik_abfragen(&self) -> Result<Statistik, MedienFehler>;

    async fn kodierung_begrenzen(&self, kodierung: Kodierung) -> Result<(), MedienFehler>;

    /// Gibt Transport und Medien frei
    async fn schliessen(&self);
}

/// Erzeugt Medien-Sitzungen
pub trait MedienFabrik: Send + Sync + 'static {
    fn erzeugen(
        &self,
        peer: UserId,
        melder: TransportMelder,
    ) -> Result<Arc<dyn MedienSitzung>, MedienFehler>;
}

// ---------------------------------------------------------------------------
// TransportMelder
// ---------------------------------------------------------------------------

/// Rueckkanal der Medien-Schicht in den `AnrufManager`
///
/// Gehoert zu genau einer Sitzung. Meldungen einer bereits beendeten
/// Sitzung verwirft der Manager.
#[derive(Debug, Clone)]
pub struct TransportMelder {
    pub(crate) peer: UserId,
    pub(crate) sitzung: u64,
    pub(crate) tx: mpsc::UnboundedSender<Befehl>,
}

impl TransportMelder {
    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Lokaler Trickle-Kandidat ist verfuegbar
    pub fn kandidat(&self, kandidat: IceKandidat) {
        let _ = self.tx.send(Befehl::LokalerKandidat {
            peer: self.peer,
            sitzung: self.sitzung,
            kandidat,
        });
    }

    /// Verbindungszustand hat sich geaendert
    pub fn zustand(&self, zustand: TransportZustand) {
        let _ = self.tx.send(Befehl::Transport {
            peer: self.peer,
            sitzung: self.sitzung,
            zustand,
        });
    }

    pub(crate) fn qualitaet(&self, stufe: u8) {
        let _ = self.tx.send(Befehl::Qualitaet {
            peer: self.peer,
            sitzung: self.sitzung,
            stufe,
        });
    }

    pub(crate) fn entprellung_abgelaufen(&self, episode: u64) {
        let _ = self.tx.send(Befehl::EntprellungAbgelaufen {
            peer: self.peer,
            sitzung: self.sitzung,
            episode,
        });
    }
}
