//! Anruf-Zustandsmaschine
//!
//! Ein `AnrufManager` laeuft als eigener Task und besitzt alle
//! Anruf-Sitzungen (eine pro Gegenstelle). Nutzeraktionen, eingehende
//! Signale, Transport-Meldungen und abgelaufene Timer kommen als `Befehl`
//! ueber einen einzigen Kanal an und werden nacheinander verarbeitet.
//!
//! ```text
//!            anrufen                      call-answered + Transport verbunden
//!   (keine) ---------> Anbieten --------------------------------------> Verbunden
//!      |                  | call-error -> (keine)                         |  ^
//!      | incoming-call    |                                  unterbrochen |  | verbunden
//!      v                  |                                               v  |
//!   EingehendAngeboten    |                                        Wiederverbinden
//!      |  ablehnen -> (keine), end-call "rejected"                   | 2 s -> ICE-Restart
//!      |  annehmen                                                   | call-error / failed
//!      v                                                             v
//!   Antworten ---- Transport verbunden ----> Verbunden            Beendet
//! ```
//!
//! Jeder Zustand kann durch `auflegen`, ein empfangenes `end-call` oder einen
//! Transportfehler enden. Beenden ist idempotent.

use fernruf_core::types::UserId;
use fernruf_protocol::medien::{AnrufMetadaten, IceKandidat, SessionBeschreibung};
use fernruf_protocol::signal::{
    AnswerCall, CallAnswered, CallError, CallUser, ClientSignal, EndCallAn, EndCallVon,
    IncomingCall, KandidatAn, KandidatVon, ServerSignal,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::AnrufConfig;
use crate::error::{AnrufFehler, AnrufResult, MedienFehler};
use crate::ereignisse::{AnrufEreignis, AnrufZustand};
use crate::medien::{MedienFabrik, MedienSitzung, TransportMelder, TransportZustand};
use crate::qualitaet::{self, QualitaetsRegler, HOECHSTE_STUFE};

/// Grund bei lokalem Auflegen
pub const GRUND_AUFGELEGT: &str = "hangup";
/// Grund beim Ablehnen eines eingehenden Anrufs
pub const GRUND_ABGELEHNT: &str = "rejected";
/// Grund nach gescheitertem Rueckfall
pub const GRUND_AUSHANDLUNG: &str = "negotiation-failed";
/// Grund bei endgueltigem Verbindungsverlust
pub const GRUND_VERBINDUNG: &str = "connectionstate:failed";
/// Grund wenn die Medien-Schicht den Transport schliesst
pub const GRUND_GESCHLOSSEN: &str = "connectionstate:closed";

const EREIGNIS_KANAL_GROESSE: usize = 128;

// ---------------------------------------------------------------------------
// Befehle
// ---------------------------------------------------------------------------

/// Eingang des Managers
#[derive(Debug)]
pub(crate) enum Befehl {
    Anrufen { peer: UserId, video: bool },
    Annehmen { peer: UserId },
    Ablehnen { peer: UserId },
    Auflegen { peer: UserId },
    Signal(ServerSignal),
    PresenceAuffrischen,
    LokalerKandidat { peer: UserId, sitzung: u64, kandidat: IceKandidat },
    Transport { peer: UserId, sitzung: u64, zustand: TransportZustand },
    Qualitaet { peer: UserId, sitzung: u64, stufe: u8 },
    EntprellungAbgelaufen { peer: UserId, sitzung: u64, episode: u64 },
    Abfrage { peer: UserId, antwort: oneshot::Sender<Option<SitzungsInfo>> },
    Herunterfahren { fertig: oneshot::Sender<()> },
}

/// Momentaufnahme einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitzungsInfo {
    pub peer: UserId,
    pub zustand: AnrufZustand,
    pub stufe: u8,
    pub nur_empfang: bool,
}

// ---------------------------------------------------------------------------
// AnrufSteuerung
// ---------------------------------------------------------------------------

/// Handle auf einen laufenden `AnrufManager`
///
/// Clone ist billig, alle Clones sprechen denselben Manager an.
#[derive(Clone)]
pub struct AnrufSteuerung {
    tx: mpsc::UnboundedSender<Befehl>,
    ereignis_tx: broadcast::Sender<AnrufEreignis>,
}

impl AnrufSteuerung {
    fn senden(&self, befehl: Befehl) -> AnrufResult<()> {
        self.tx.send(befehl).map_err(|_| AnrufFehler::ManagerBeendet)
    }

    /// Startet einen Anruf; existiert schon eine Sitzung zu `peer`, passiert nichts
    pub fn anrufen(&self, peer: UserId, video: bool) -> AnrufResult<()> {
        self.senden(Befehl::Anrufen { peer, video })
    }

    pub fn annehmen(&self, peer: UserId) -> AnrufResult<()> {
        self.senden(Befehl::Annehmen { peer })
    }

    pub fn ablehnen(&self, peer: UserId) -> AnrufResult<()> {
        self.senden(Befehl::Ablehnen { peer })
    }

    pub fn auflegen(&self, peer: UserId) -> AnrufResult<()> {
        self.senden(Befehl::Auflegen { peer })
    }

    /// Uebergibt ein Ereignis vom Signaling-Server
    pub fn signal_empfangen(&self, signal: ServerSignal) -> AnrufResult<()> {
        self.senden(Befehl::Signal(signal))
    }

    /// Bittet den Server, allen Clients `online-status` zu schicken
    pub fn presence_auffrischen(&self) -> AnrufResult<()> {
        self.senden(Befehl::PresenceAuffrischen)
    }

    /// Aktueller Stand der Sitzung zu `peer`
    pub async fn sitzung(&self, peer: UserId) -> AnrufResult<Option<SitzungsInfo>> {
        let (antwort, rx) = oneshot::channel();
        self.senden(Befehl::Abfrage { peer, antwort })?;
        rx.await.map_err(|_| AnrufFehler::ManagerBeendet)
    }

    /// Beendet alle Anrufe und stoppt den Manager
    pub async fn herunterfahren(&self) -> AnrufResult<()> {
        let (fertig, rx) = oneshot::channel();
        self.senden(Befehl::Herunterfahren { fertig })?;
        rx.await.map_err(|_| AnrufFehler::ManagerBeendet)
    }

    pub fn ereignisse(&self) -> broadcast::Receiver<AnrufEreignis> {
        self.ereignis_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Sitzung
// ---------------------------------------------------------------------------

struct AnrufSitzung {
    nr: u64,
    zustand: AnrufZustand,
    video: bool,
    melder: TransportMelder,
    /// `None` solange ein eingehender Anruf nicht angenommen ist
    medien: Option<Arc<dyn MedienSitzung>>,
    eingehendes_angebot: Option<SessionBeschreibung>,
    /// Kandidaten, die vor der Remote-Beschreibung ankamen
    puffer: Vec<IceKandidat>,
    remote_gesetzt: bool,
    nur_empfang: bool,
    stufe: u8,
    /// Zaehlt die Unterbrechungen, jeder Entprell-Timer gehoert zu genau einer
    episode: u64,
    /// ICE-Restart in der aktuellen Unterbrechung bereits gesendet
    neustart_gesendet: bool,
    entprellung: Option<JoinHandle<()>>,
    qualitaet: Option<JoinHandle<()>>,
}

impl AnrufSitzung {
    fn info(&self, peer: UserId) -> SitzungsInfo {
        SitzungsInfo {
            peer,
            zustand: self.zustand,
            stufe: self.stufe,
            nur_empfang: self.nur_empfang,
        }
    }

    fn entprellung_stoppen(&mut self) {
        if let Some(timer) = self.entprellung.take() {
            timer.abort();
        }
    }

    fn qualitaet_stoppen(&mut self) {
        if let Some(task) = self.qualitaet.take() {
            task.abort();
        }
    }
}

impl Drop for AnrufSitzung {
    fn drop(&mut self) {
        self.entprellung_stoppen();
        self.qualitaet_stoppen();
    }
}

// ---------------------------------------------------------------------------
// AnrufManager
// ---------------------------------------------------------------------------

/// Besitzt alle Anruf-Sitzungen eines Clients
pub struct AnrufManager {
    ich: UserId,
    config: AnrufConfig,
    fabrik: Arc<dyn MedienFabrik>,
    ausgang: mpsc::UnboundedSender<ClientSignal>,
    befehl_tx: mpsc::UnboundedSender<Befehl>,
    befehl_rx: mpsc::UnboundedReceiver<Befehl>,
    ereignis_tx: broadcast::Sender<AnrufEreignis>,
    sitzungen: HashMap<UserId, AnrufSitzung>,
    naechste_nr: u64,
}

impl AnrufManager {
    /// Erstellt Manager, Steuerung und den Kanal fuer ausgehende Signale
    pub fn neu(
        ich: UserId,
        config: AnrufConfig,
        fabrik: Arc<dyn MedienFabrik>,
    ) -> (Self, AnrufSteuerung, mpsc::UnboundedReceiver<ClientSignal>) {
        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();
        let (ausgang, ausgang_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, _) = broadcast::channel(EREIGNIS_KANAL_GROESSE);

        let steuerung = AnrufSteuerung {
            tx: befehl_tx.clone(),
            ereignis_tx: ereignis_tx.clone(),
        };
        let manager = Self {
            ich,
            config,
            fabrik,
            ausgang,
            befehl_tx,
            befehl_rx,
            ereignis_tx,
            sitzungen: HashMap::new(),
            naechste_nr: 1,
        };
        (manager, steuerung, ausgang_rx)
    }

    /// Verarbeitet Befehle bis `herunterfahren`
    pub async fn laufen(mut self) {
        tracing::debug!(ich = %self.ich, "Anruf-Manager gestartet");

        while let Some(befehl) = self.befehl_rx.recv().await {
            if let Befehl::Herunterfahren { fertig } = befehl {
                let peers: Vec<UserId> = self.sitzungen.keys().copied().collect();
                for peer in peers {
                    self.beenden(peer, GRUND_AUFGELEGT, true).await;
                }
                let _ = fertig.send(());
                break;
            }
            self.verarbeiten(befehl).await;
        }

        tracing::debug!(ich = %self.ich, "Anruf-Manager gestoppt");
    }

    async fn verarbeiten(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::Anrufen { peer, video } => self.anrufen(peer, video).await,
            Befehl::Annehmen { peer } => self.annehmen(peer).await,
            Befehl::Ablehnen { peer } => self.ablehnen(peer).await,
            Befehl::Auflegen { peer } => self.beenden(peer, GRUND_AUFGELEGT, true).await,
            Befehl::Signal(signal) => self.signal(signal).await,
            Befehl::PresenceAuffrischen => self.senden(ClientSignal::PresenceRefresh),
            Befehl::LokalerKandidat {
                peer,
                sitzung,
                kandidat,
            } => {
                if self.aktuelle(peer, sitzung).is_some() {
                    self.senden(ClientSignal::IceCandidate(KandidatAn {
                        to_user_id: peer,
                        from_user_id: Some(self.ich),
                        candidate: kandidat,
                    }));
                }
            }
            Befehl::Transport {
                peer,
                sitzung,
                zustand,
            } => self.transport(peer, sitzung, zustand).await,
            Befehl::Qualitaet {
                peer,
                sitzung,
                stufe,
            } => {
                if let Some(s) = self.aktuelle(peer, sitzung) {
                    s.stufe = stufe;
                    self.ereignis(AnrufEreignis::QualitaetGeaendert { peer, stufe });
                }
            }
            Befehl::EntprellungAbgelaufen {
                peer,
                sitzung,
                episode,
            } => self.entprellung_abgelaufen(peer, sitzung, episode).await,
            Befehl::Abfrage { peer, antwort } => {
                let _ = antwort.send(self.sitzungen.get(&peer).map(|s| s.info(peer)));
            }
            // Wird in `laufen` behandelt
            Befehl::Herunterfahren { fertig } => {
                let _ = fertig.send(());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Nutzeraktionen
    // -----------------------------------------------------------------------

    async fn anrufen(&mut self, peer: UserId, video: bool) {
        if self.sitzungen.contains_key(&peer) {
            tracing::debug!(peer = %peer, "Sitzung existiert bereits, anrufen ignoriert");
            return;
        }

        let nr = self.sitzung_anlegen(peer, AnrufZustand::Anbieten, video, None);
        tracing::info!(peer = %peer, video, "Anruf wird gestartet");
        self.zustand_melden(peer, AnrufZustand::Anbieten);

        let Some(medien) = self.medien_erzeugen(peer).await else {
            return;
        };
        if !self.lokale_medien(peer, &medien, video).await {
            return;
        }

        match mit_rueckfall(&medien, video, "angebot", |m| async move {
            m.angebot_erzeugen(false).await
        })
        .await
        {
            Ok(angebot) => self.senden(ClientSignal::CallUser(CallUser {
                to_user_id: peer,
                from_user_id: Some(self.ich),
                offer: angebot,
                metadata: AnrufMetadaten {
                    video,
                    restart: false,
                },
            })),
            Err(e) => {
                tracing::warn!(peer = %peer, sitzung = nr, fehler = %e, "Angebot endgueltig gescheitert");
                self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
            }
        }
    }

    async fn annehmen(&mut self, peer: UserId) {
        let angebot = match self.sitzungen.get_mut(&peer) {
            Some(s) if s.zustand == AnrufZustand::EingehendAngeboten => {
                match s.eingehendes_angebot.take() {
                    Some(angebot) => {
                        s.zustand = AnrufZustand::Antworten;
                        angebot
                    }
                    None => return,
                }
            }
            _ => {
                tracing::debug!(peer = %peer, "Kein eingehender Anruf zum Annehmen");
                return;
            }
        };
        let video = self.sitzungen.get(&peer).is_some_and(|s| s.video);
        tracing::info!(peer = %peer, "Anruf angenommen");
        self.zustand_melden(peer, AnrufZustand::Antworten);

        let Some(medien) = self.medien_erzeugen(peer).await else {
            return;
        };
        if !self.remote_anwenden(peer, &medien, video, angebot).await {
            return;
        }
        if !self.lokale_medien(peer, &medien, video).await {
            return;
        }
        self.antworten(peer, &medien, video).await;
    }

    async fn ablehnen(&mut self, peer: UserId) {
        match self.sitzungen.get(&peer) {
            Some(s) if s.zustand == AnrufZustand::EingehendAngeboten => {
                tracing::info!(peer = %peer, "Anruf abgelehnt");
                self.beenden(peer, GRUND_ABGELEHNT, true).await;
            }
            _ => tracing::debug!(peer = %peer, "Kein eingehender Anruf zum Ablehnen"),
        }
    }

    // -----------------------------------------------------------------------
    // Signale vom Server
    // -----------------------------------------------------------------------

    async fn signal(&mut self, signal: ServerSignal) {
        match signal {
            ServerSignal::IncomingCall(anruf) => self.eingehender_anruf(anruf).await,
            ServerSignal::CallAnswered(CallAnswered {
                from_user_id,
                answer,
            }) => self.antwort_erhalten(from_user_id, answer).await,
            ServerSignal::IceCandidate(KandidatVon {
                from_user_id,
                candidate,
            }) => self.kandidat_erhalten(from_user_id, candidate).await,
            ServerSignal::EndCall(EndCallVon {
                from_user_id,
                reason,
            }) => {
                if self.sitzungen.contains_key(&from_user_id) {
                    tracing::info!(peer = %from_user_id, grund = %reason, "Anruf von Gegenstelle beendet");
                }
                self.beenden(from_user_id, &reason, false).await;
            }
            ServerSignal::CallError(CallError {
                to_user_id,
                message,
            }) => self.anruf_fehler(to_user_id, message).await,
            ServerSignal::OnlineStatus(status) => {
                self.ereignis(AnrufEreignis::PresenceGeaendert {
                    geaendert: status.changed_user_id,
                });
            }
            ServerSignal::SessionReplaced => self.ereignis(AnrufEreignis::SitzungAbgeloest),
            andere => {
                tracing::trace!(event = andere.name(), "Ereignis fuer den Manager ohne Bedeutung");
            }
        }
    }

    async fn eingehender_anruf(&mut self, anruf: IncomingCall) {
        let peer = anruf.from_user_id;

        if let Some(sitzung) = self.sitzungen.get(&peer) {
            let neustart = anruf.metadata.restart
                && matches!(
                    sitzung.zustand,
                    AnrufZustand::Verbunden | AnrufZustand::Wiederverbinden
                );
            if !neustart {
                tracing::debug!(peer = %peer, zustand = %sitzung.zustand, "Angebot fuer bestehende Sitzung ignoriert");
                return;
            }
            // Beide Seiten haben gleichzeitig neu gestartet: das Angebot der
            // kleineren UserId gewinnt, die andere Seite antwortet darauf
            let eigenes_offen =
                sitzung.zustand == AnrufZustand::Wiederverbinden && sitzung.neustart_gesendet;
            if eigenes_offen && self.ich < peer {
                tracing::debug!(peer = %peer, "Gleichzeitiger ICE-Restart, eigenes Angebot hat Vorrang");
                return;
            }
            let (Some(medien), video) = (sitzung.medien.clone(), sitzung.video) else {
                return;
            };

            tracing::info!(peer = %peer, "ICE-Restart der Gegenstelle, antworte automatisch");
            if self.remote_anwenden(peer, &medien, video, anruf.offer).await {
                self.antworten(peer, &medien, video).await;
            }
            return;
        }

        tracing::info!(peer = %peer, name = %anruf.from_name, "Eingehender Anruf");
        self.sitzung_anlegen(
            peer,
            AnrufZustand::EingehendAngeboten,
            anruf.metadata.video,
            Some(anruf.offer),
        );
        self.ereignis(AnrufEreignis::EingehenderAnruf {
            von: peer,
            name: anruf.from_name,
            video: anruf.metadata.video,
        });
        self.zustand_melden(peer, AnrufZustand::EingehendAngeboten);
    }

    async fn antwort_erhalten(&mut self, peer: UserId, antwort: SessionBeschreibung) {
        let (medien, video) = match self.sitzungen.get(&peer) {
            Some(s)
                if matches!(
                    s.zustand,
                    AnrufZustand::Anbieten | AnrufZustand::Wiederverbinden
                ) =>
            {
                match s.medien.clone() {
                    Some(m) => (m, s.video),
                    None => return,
                }
            }
            _ => {
                tracing::debug!(peer = %peer, "Antwort ohne offenes Angebot verworfen");
                return;
            }
        };
        self.remote_anwenden(peer, &medien, video, antwort).await;
    }

    async fn kandidat_erhalten(&mut self, peer: UserId, kandidat: IceKandidat) {
        let Some(sitzung) = self.sitzungen.get_mut(&peer) else {
            tracing::debug!(peer = %peer, "Kandidat ohne Sitzung verworfen");
            return;
        };
        let medien = match (&sitzung.medien, sitzung.remote_gesetzt) {
            (Some(m), true) => Arc::clone(m),
            _ => {
                sitzung.puffer.push(kandidat);
                return;
            }
        };
        if let Err(e) = medien.kandidat_hinzufuegen(kandidat).await {
            tracing::warn!(peer = %peer, fehler = %e, "Kandidat nicht uebernommen");
        }
    }

    async fn anruf_fehler(&mut self, peer: UserId, meldung: String) {
        let Some(zustand) = self.sitzungen.get(&peer).map(|s| s.zustand) else {
            return;
        };
        match zustand {
            AnrufZustand::Anbieten => {
                // Gegenstelle hat nie etwas erhalten, kein end-call
                tracing::info!(peer = %peer, meldung = %meldung, "Anruf nicht zustellbar");
                self.beenden(peer, &meldung, false).await;
            }
            AnrufZustand::Wiederverbinden => {
                tracing::info!(peer = %peer, meldung = %meldung, "ICE-Restart nicht zustellbar");
                self.beenden(peer, GRUND_VERBINDUNG, true).await;
            }
            andere => {
                tracing::debug!(peer = %peer, zustand = %andere, "call-error ignoriert");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transport und Timer
    // -----------------------------------------------------------------------

    async fn transport(&mut self, peer: UserId, nr: u64, transport: TransportZustand) {
        let Some(sitzung) = self.sitzungen.get_mut(&peer).filter(|s| s.nr == nr) else {
            return;
        };
        let zustand = sitzung.zustand;
        tracing::debug!(peer = %peer, zustand = %zustand, transport = ?transport, "Transport-Meldung");

        match (zustand, transport) {
            (
                AnrufZustand::Anbieten | AnrufZustand::Antworten | AnrufZustand::Wiederverbinden,
                TransportZustand::Verbunden,
            ) => {
                sitzung.entprellung_stoppen();
                sitzung.neustart_gesendet = false;
                sitzung.zustand = AnrufZustand::Verbunden;
                if let Some(medien) = sitzung.medien.clone() {
                    let regler = QualitaetsRegler::mit_stufe(self.config.clone(), sitzung.stufe);
                    sitzung.qualitaet = Some(qualitaet::ueberwachen(
                        medien,
                        regler,
                        sitzung.melder.clone(),
                    ));
                }
                tracing::info!(peer = %peer, "Anruf verbunden");
                self.zustand_melden(peer, AnrufZustand::Verbunden);
            }

            (
                AnrufZustand::Verbunden,
                TransportZustand::Unterbrochen | TransportZustand::Fehlgeschlagen,
            ) => {
                sitzung.qualitaet_stoppen();
                sitzung.zustand = AnrufZustand::Wiederverbinden;
                sitzung.episode += 1;
                let episode = sitzung.episode;
                let melder = sitzung.melder.clone();
                let dauer = self.config.entprellung;
                sitzung.entprellung = Some(tokio::spawn(async move {
                    tokio::time::sleep(dauer).await;
                    melder.entprellung_abgelaufen(episode);
                }));
                tracing::info!(peer = %peer, episode, "Verbindung unterbrochen");
                self.zustand_melden(peer, AnrufZustand::Wiederverbinden);
            }

            (AnrufZustand::Wiederverbinden, TransportZustand::Fehlgeschlagen) => {
                if sitzung.neustart_gesendet {
                    self.beenden(peer, GRUND_VERBINDUNG, true).await;
                }
            }

            (
                AnrufZustand::Anbieten | AnrufZustand::Antworten,
                TransportZustand::Fehlgeschlagen,
            ) => {
                self.beenden(peer, GRUND_VERBINDUNG, true).await;
            }

            (_, TransportZustand::Geschlossen) => {
                self.beenden(peer, GRUND_GESCHLOSSEN, true).await;
            }

            _ => {}
        }
    }

    /// Timer einer frueheren Unterbrechung (schon in der Queue, als die
    /// Verbindung sich erholte) werden ueber `episode` verworfen
    async fn entprellung_abgelaufen(&mut self, peer: UserId, nr: u64, episode: u64) {
        let (medien, video) = match self.aktuelle(peer, nr) {
            Some(s)
                if s.zustand == AnrufZustand::Wiederverbinden
                    && s.episode == episode
                    && !s.neustart_gesendet =>
            {
                s.entprellung = None;
                s.neustart_gesendet = true;
                match s.medien.clone() {
                    Some(m) => (m, s.video),
                    None => return,
                }
            }
            _ => return,
        };

        tracing::info!(peer = %peer, "Weiterhin getrennt, sende ICE-Restart");
        match mit_rueckfall(&medien, video, "neustart", |m| async move {
            m.angebot_erzeugen(true).await
        })
        .await
        {
            Ok(angebot) => self.senden(ClientSignal::CallUser(CallUser {
                to_user_id: peer,
                from_user_id: Some(self.ich),
                offer: angebot,
                metadata: AnrufMetadaten {
                    video,
                    restart: true,
                },
            })),
            Err(e) => {
                tracing::warn!(peer = %peer, fehler = %e, "ICE-Restart endgueltig gescheitert");
                self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn sitzung_anlegen(
        &mut self,
        peer: UserId,
        zustand: AnrufZustand,
        video: bool,
        eingehendes_angebot: Option<SessionBeschreibung>,
    ) -> u64 {
        let nr = self.naechste_nr;
        self.naechste_nr += 1;
        let melder = TransportMelder {
            peer,
            sitzung: nr,
            tx: self.befehl_tx.clone(),
        };
        self.sitzungen.insert(
            peer,
            AnrufSitzung {
                nr,
                zustand,
                video,
                melder,
                medien: None,
                eingehendes_angebot,
                puffer: Vec::new(),
                remote_gesetzt: false,
                nur_empfang: false,
                stufe: HOECHSTE_STUFE,
                episode: 0,
                neustart_gesendet: false,
                entprellung: None,
                qualitaet: None,
            },
        );
        nr
    }

    /// Sitzung zu `peer`, sofern sie noch die Sitzung `nr` ist
    fn aktuelle(&mut self, peer: UserId, nr: u64) -> Option<&mut AnrufSitzung> {
        self.sitzungen.get_mut(&peer).filter(|s| s.nr == nr)
    }

    async fn medien_erzeugen(&mut self, peer: UserId) -> Option<Arc<dyn MedienSitzung>> {
        let melder = self.sitzungen.get(&peer)?.melder.clone();
        match self.fabrik.erzeugen(peer, melder) {
            Ok(medien) => {
                if let Some(s) = self.sitzungen.get_mut(&peer) {
                    s.medien = Some(Arc::clone(&medien));
                }
                Some(medien)
            }
            Err(e) => {
                tracing::warn!(peer = %peer, fehler = %e, "Medien-Sitzung nicht erzeugt");
                self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
                None
            }
        }
    }

    /// Haengt Kamera/Mikrofon an, sonst Nur-Empfang; `false` wenn beendet
    async fn lokale_medien(
        &mut self,
        peer: UserId,
        medien: &Arc<dyn MedienSitzung>,
        video: bool,
    ) -> bool {
        let fehler = match medien.lokale_medien_anhaengen(video).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        tracing::warn!(peer = %peer, fehler = %fehler, "Lokale Medien nicht verfuegbar, nur Empfang");
        if let Err(e) = medien.empfangs_transceiver_sicherstellen(video).await {
            tracing::warn!(peer = %peer, fehler = %e, "Empfangs-Transceiver nicht angelegt");
            self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
            return false;
        }
        if let Some(s) = self.sitzungen.get_mut(&peer) {
            s.nur_empfang = true;
        }
        self.ereignis(AnrufEreignis::NurEmpfang { peer });
        true
    }

    /// Setzt die Remote-Beschreibung und spielt gepufferte Kandidaten ein
    async fn remote_anwenden(
        &mut self,
        peer: UserId,
        medien: &Arc<dyn MedienSitzung>,
        video: bool,
        beschreibung: SessionBeschreibung,
    ) -> bool {
        let ergebnis = mit_rueckfall(medien, video, "remote-beschreibung", |m| {
            let b = beschreibung.clone();
            async move { m.remote_beschreibung_setzen(b).await }
        })
        .await;

        if let Err(e) = ergebnis {
            tracing::warn!(peer = %peer, fehler = %e, "Remote-Beschreibung endgueltig abgelehnt");
            self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
            return false;
        }

        let gepuffert = match self.sitzungen.get_mut(&peer) {
            Some(s) => {
                s.remote_gesetzt = true;
                std::mem::take(&mut s.puffer)
            }
            None => return false,
        };
        if !gepuffert.is_empty() {
            tracing::debug!(peer = %peer, anzahl = gepuffert.len(), "Gepufferte Kandidaten eingespielt");
        }
        for kandidat in gepuffert {
            if let Err(e) = medien.kandidat_hinzufuegen(kandidat).await {
                tracing::warn!(peer = %peer, fehler = %e, "Kandidat nicht uebernommen");
            }
        }
        true
    }

    async fn antworten(&mut self, peer: UserId, medien: &Arc<dyn MedienSitzung>, video: bool) {
        match mit_rueckfall(medien, video, "antwort", |m| async move {
            m.antwort_erzeugen().await
        })
        .await
        {
            Ok(antwort) => self.senden(ClientSignal::AnswerCall(AnswerCall {
                to_user_id: peer,
                from_user_id: Some(self.ich),
                answer: antwort,
            })),
            Err(e) => {
                tracing::warn!(peer = %peer, fehler = %e, "Antwort endgueltig gescheitert");
                self.beenden(peer, GRUND_AUSHANDLUNG, true).await;
            }
        }
    }

    /// Endzustand: Timer stoppen, Medien freigeben, Gegenstelle informieren
    ///
    /// Ohne Sitzung passiert nichts.
    async fn beenden(&mut self, peer: UserId, grund: &str, end_senden: bool) {
        let Some(mut sitzung) = self.sitzungen.remove(&peer) else {
            return;
        };
        sitzung.entprellung_stoppen();
        sitzung.qualitaet_stoppen();

        if end_senden {
            self.senden(ClientSignal::EndCall(EndCallAn {
                to_user_id: peer,
                from_user_id: Some(self.ich),
                reason: grund.to_string(),
            }));
        }
        if let Some(medien) = sitzung.medien.take() {
            medien.schliessen().await;
        }

        tracing::info!(peer = %peer, grund, "Anruf beendet");
        self.ereignis(AnrufEreignis::OberflaecheEntfernt { peer });
        self.ereignis(AnrufEreignis::Beendet {
            peer,
            grund: grund.to_string(),
        });
    }

    fn senden(&self, signal: ClientSignal) {
        if self.ausgang.send(signal).is_err() {
            tracing::warn!("Signaling-Verbindung geschlossen, Signal verworfen");
        }
    }

    fn ereignis(&self, ereignis: AnrufEreignis) {
        // Ohne Abonnenten ist das kein Fehler
        let _ = self.ereignis_tx.send(ereignis);
    }

    fn zustand_melden(&self, peer: UserId, zustand: AnrufZustand) {
        self.ereignis(AnrufEreignis::ZustandGeaendert { peer, zustand });
    }
}

/// Fuehrt einen Aushandlungsschritt aus, beim ersten Fehler einmal erneut
/// nach Anlegen der Empfangs-Transceiver
async fn mit_rueckfall<T, F, Fut>(
    medien: &Arc<dyn MedienSitzung>,
    video: bool,
    schritt: &'static str,
    ausfuehren: F,
) -> Result<T, MedienFehler>
where
    F: Fn(Arc<dyn MedienSitzung>) -> Fut,
    Fut: Future<Output = Result<T, MedienFehler>>,
{
    match ausfuehren(Arc::clone(medien)).await {
        Ok(wert) => Ok(wert),
        Err(fehler) => {
            tracing::warn!(schritt, fehler = %fehler, "Aushandlung fehlgeschlagen, Rueckfall auf Empfang");
            medien.empfangs_transceiver_sicherstellen(video).await?;
            ausfuehren(Arc::clone(medien)).await
        }
    }
}
