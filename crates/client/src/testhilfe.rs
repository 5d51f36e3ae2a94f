//! Nachgebildete Medien-Schicht fuer Tests

use async_trait::async_trait;
use fernruf_core::types::UserId;
use fernruf_protocol::medien::{IceKandidat, SessionBeschreibung};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::MedienFehler;
use crate::medien::{Kodierung, MedienFabrik, MedienSitzung, Statistik, TransportMelder};

/// Fehlerverhalten neu erzeugter Sitzungen
#[derive(Debug, Clone, Default)]
pub(crate) struct Verhalten {
    pub erzeugen_fehler: bool,
    pub medien_fehlen: bool,
    pub angebot_fehler: usize,
    pub antwort_fehler: usize,
    pub remote_fehler: usize,
}

pub(crate) struct FakeSitzung {
    pub melder: TransportMelder,
    pub protokoll: Mutex<Vec<String>>,
    pub statistik: Mutex<Statistik>,
    pub kodierungen: Mutex<Vec<Kodierung>>,
    pub verhalten: Mutex<Verhalten>,
}

impl FakeSitzung {
    pub fn protokoll(&self) -> Vec<String> {
        self.protokoll.lock().clone()
    }

    pub fn schliessungen(&self) -> usize {
        self.protokoll().iter().filter(|e| *e == "schliessen").count()
    }

    fn notieren(&self, eintrag: impl Into<String>) {
        self.protokoll.lock().push(eintrag.into());
    }
}

#[async_trait]
impl MedienSitzung for FakeSitzung {
    async fn lokale_medien_anhaengen(&self, _video: bool) -> Result<(), MedienFehler> {
        self.notieren("anhaengen");
        if self.verhalten.lock().medien_fehlen {
            return Err(MedienFehler::Erfassung("keine Kamera".into()));
        }
        Ok(())
    }

    async fn empfangs_transceiver_sicherstellen(&self, _video: bool) -> Result<(), MedienFehler> {
        self.notieren("transceiver");
        Ok(())
    }

    async fn angebot_erzeugen(
        &self,
        ice_neustart: bool,
    ) -> Result<SessionBeschreibung, MedienFehler> {
        self.notieren(if ice_neustart { "angebot-neustart" } else { "angebot" });
        let mut v = self.verhalten.lock();
        if v.angebot_fehler > 0 {
            v.angebot_fehler -= 1;
            return Err(MedienFehler::Aushandlung("angebot".into()));
        }
        Ok(SessionBeschreibung::angebot("sdp-angebot"))
    }

    async fn antwort_erzeugen(&self) -> Result<SessionBeschreibung, MedienFehler> {
        self.notieren("antwort");
        let mut v = self.verhalten.lock();
        if v.antwort_fehler > 0 {
            v.antwort_fehler -= 1;
            return Err(MedienFehler::Aushandlung("antwort".into()));
        }
        Ok(SessionBeschreibung::antwort("sdp-antwort"))
    }

    async fn remote_beschreibung_setzen(
        &self,
        beschreibung: SessionBeschreibung,
    ) -> Result<(), MedienFehler> {
        self.notieren(format!("remote:{}", beschreibung.sdp));
        let mut v = self.verhalten.lock();
        if v.remote_fehler > 0 {
            v.remote_fehler -= 1;
            return Err(MedienFehler::Aushandlung("remote".into()));
        }
        Ok(())
    }

    async fn kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> Result<(), MedienFehler> {
        self.notieren(format!("kandidat:{}", kandidat.candidate));
        Ok(())
    }

    async fn statistik_abfragen(&self) -> Result<Statistik, MedienFehler> {
        Ok(self.statistik.lock().clone())
    }

    async fn kodierung_begrenzen(&self, kodierung: Kodierung) -> Result<(), MedienFehler> {
        self.kodierungen.lock().push(kodierung);
        Ok(())
    }

    async fn schliessen(&self) {
        self.notieren("schliessen");
    }
}

#[derive(Default)]
pub(crate) struct FakeFabrik {
    pub verhalten: Mutex<Verhalten>,
    sitzungen: Mutex<Vec<(UserId, Arc<FakeSitzung>)>>,
}

impl FakeFabrik {
    pub fn mit(verhalten: Verhalten) -> Arc<Self> {
        let fabrik = Self::default();
        *fabrik.verhalten.lock() = verhalten;
        Arc::new(fabrik)
    }

    /// Zuletzt erzeugte Sitzung fuer `peer`
    pub fn fuer(&self, peer: UserId) -> Arc<FakeSitzung> {
        self.sitzungen
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| *p == peer)
            .map(|(_, s)| Arc::clone(s))
            .expect("keine Sitzung fuer diesen Peer erzeugt")
    }

    pub fn anzahl(&self) -> usize {
        self.sitzungen.lock().len()
    }
}

impl MedienFabrik for FakeFabrik {
    fn erzeugen(
        &self,
        peer: UserId,
        melder: TransportMelder,
    ) -> Result<Arc<dyn MedienSitzung>, MedienFehler> {
        if self.verhalten.lock().erzeugen_fehler {
            return Err(MedienFehler::Aushandlung("keine Peer-Verbindung".into()));
        }
        let sitzung = Arc::new(FakeSitzung {
            melder,
            protokoll: Mutex::new(Vec::new()),
            statistik: Mutex::new(Statistik::default()),
            kodierungen: Mutex::new(Vec::new()),
            verhalten: Mutex::new(self.verhalten.lock().clone()),
        });
        self.sitzungen.lock().push((peer, Arc::clone(&sitzung)));
        Ok(sitzung)
    }
}
