//! Anruf-Ablauf zwischen zwei Clients ueber einen echten Signaling-Server

use async_trait::async_trait;
use fernruf_client::{
    AnrufConfig, AnrufEreignis, AnrufManager, AnrufSteuerung, AnrufZustand, Kodierung,
    MedienFabrik, MedienFehler, MedienSitzung, SignalingClient, Statistik, TransportMelder,
    TransportZustand,
};
use fernruf_core::types::{Identitaet, Rolle, UserId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::medien::{IceKandidat, SdpTyp, SessionBeschreibung};
use fernruf_signaling::{SignalingConfig, SignalingServer, SignalingState, StatischeBenutzer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const WARTEZEIT: Duration = Duration::from_secs(5);

/// Medien-Schicht, deren Transport sofort nach der Aushandlung steht
struct Medien {
    melder: TransportMelder,
}

#[async_trait]
impl MedienSitzung for Medien {
    async fn lokale_medien_anhaengen(&self, _video: bool) -> Result<(), MedienFehler> {
        Ok(())
    }
    async fn empfangs_transceiver_sicherstellen(&self, _video: bool) -> Result<(), MedienFehler> {
        Ok(())
    }
    async fn angebot_erzeugen(&self, _neustart: bool) -> Result<SessionBeschreibung, MedienFehler> {
        Ok(SessionBeschreibung::angebot("v=0 angebot"))
    }
    async fn antwort_erzeugen(&self) -> Result<SessionBeschreibung, MedienFehler> {
        self.melder.zustand(TransportZustand::Verbunden);
        Ok(SessionBeschreibung::antwort("v=0 antwort"))
    }
    async fn remote_beschreibung_setzen(&self, b: SessionBeschreibung) -> Result<(), MedienFehler> {
        if b.typ == SdpTyp::Answer {
            self.melder.zustand(TransportZustand::Verbunden);
        }
        Ok(())
    }
    async fn kandidat_hinzufuegen(&self, _k: IceKandidat) -> Result<(), MedienFehler> {
        Ok(())
    }
    async fn statistik_abfragen(&self) -> Result<Statistik, MedienFehler> {
        Err(MedienFehler::KeineStatistik)
    }
    async fn kodierung_begrenzen(&self, _k: Kodierung) -> Result<(), MedienFehler> {
        Ok(())
    }
    async fn schliessen(&self) {}
}

#[derive(Default)]
struct Fabrik {
    melder: Mutex<Vec<TransportMelder>>,
}

impl Fabrik {
    fn melder(&self) -> TransportMelder {
        self.melder.lock().last().cloned().unwrap()
    }
}

impl MedienFabrik for Fabrik {
    fn erzeugen(
        &self,
        _peer: UserId,
        melder: TransportMelder,
    ) -> Result<Arc<dyn MedienSitzung>, MedienFehler> {
        self.melder.lock().push(melder.clone());
        Ok(Arc::new(Medien { melder }))
    }
}

struct Teilnehmer {
    id: UserId,
    steuerung: AnrufSteuerung,
    ereignisse: broadcast::Receiver<AnrufEreignis>,
    fabrik: Arc<Fabrik>,
    verbindung: JoinHandle<()>,
}

impl Teilnehmer {
    async fn anmelden(adresse: SocketAddr, token: &str) -> Self {
        let client = SignalingClient::verbinden(adresse, token).await.unwrap();
        let id = client.identitaet().id;
        let fabrik = Arc::new(Fabrik::default());
        let config = AnrufConfig {
            entprellung: Duration::from_millis(200),
            ..Default::default()
        };
        let (manager, steuerung, ausgang) = AnrufManager::neu(id, config, fabrik.clone());
        let ereignisse = steuerung.ereignisse();
        tokio::spawn(manager.laufen());
        let pumpe = steuerung.clone();
        let verbindung = tokio::spawn(async move {
            let _ = client.betreiben(pumpe, ausgang).await;
        });
        Self {
            id,
            steuerung,
            ereignisse,
            fabrik,
            verbindung,
        }
    }

    async fn warten_auf<F>(&mut self, mut passt: F) -> AnrufEreignis
    where
        F: FnMut(&AnrufEreignis) -> bool,
    {
        let frist = tokio::time::Instant::now() + WARTEZEIT;
        loop {
            match tokio::time::timeout_at(frist, self.ereignisse.recv()).await {
                Ok(Ok(e)) if passt(&e) => return e,
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                andere => panic!("Ereignis nicht eingetroffen: {:?}", andere),
            }
        }
    }

    async fn warten_auf_zustand(&mut self, peer: UserId, zustand: AnrufZustand) {
        self.warten_auf(|e| *e == AnrufEreignis::ZustandGeaendert { peer, zustand })
            .await;
    }
}

async fn server_starten() -> (SocketAddr, Arc<SignalingState>, watch::Sender<bool>) {
    let benutzer = StatischeBenutzer::neu(vec![
        (
            "tok-anna".to_string(),
            Identitaet::neu(UserId::new(), "Anna", Rolle::Berater),
        ),
        (
            "tok-ben".to_string(),
            Identitaet::neu(UserId::new(), "Ben", Rolle::Klient),
        ),
    ]);
    let state = SignalingState::neu(
        SignalingConfig::default(),
        Arc::new(benutzer),
        FernrufMetrics::neu().unwrap(),
    );
    let server = SignalingServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let adresse = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    (adresse, state, shutdown_tx)
}

#[tokio::test]
async fn anruf_annehmen_und_gegenstelle_verschwindet() {
    let (adresse, state, _shutdown) = server_starten().await;
    let mut anna = Teilnehmer::anmelden(adresse, "tok-anna").await;
    let mut ben = Teilnehmer::anmelden(adresse, "tok-ben").await;

    anna.steuerung.anrufen(ben.id, false).unwrap();
    match ben
        .warten_auf(|e| matches!(e, AnrufEreignis::EingehenderAnruf { .. }))
        .await
    {
        AnrufEreignis::EingehenderAnruf { von, name, .. } => {
            assert_eq!(von, anna.id);
            assert_eq!(name, "Anna");
        }
        _ => unreachable!(),
    }

    ben.steuerung.annehmen(anna.id).unwrap();
    ben.warten_auf_zustand(anna.id, AnrufZustand::Verbunden).await;
    anna.warten_auf_zustand(ben.id, AnrufZustand::Verbunden).await;

    // Ben verschwindet ohne end-call
    ben.verbindung.abort();
    let frist = tokio::time::Instant::now() + WARTEZEIT;
    while state.registry.ist_online(&ben.id) {
        assert!(tokio::time::Instant::now() < frist, "Ben bleibt gebunden");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    anna.fabrik.melder().zustand(TransportZustand::Unterbrochen);
    anna.warten_auf_zustand(ben.id, AnrufZustand::Wiederverbinden)
        .await;

    let ende = anna
        .warten_auf(|e| matches!(e, AnrufEreignis::Beendet { .. }))
        .await;
    assert_eq!(
        ende,
        AnrufEreignis::Beendet {
            peer: ben.id,
            grund: "connectionstate:failed".into(),
        }
    );
    assert!(anna.steuerung.sitzung(ben.id).await.unwrap().is_none());
}

#[tokio::test]
async fn anruf_an_offline_peer() {
    let (adresse, _state, _shutdown) = server_starten().await;
    let mut anna = Teilnehmer::anmelden(adresse, "tok-anna").await;
    let abwesend = UserId::new();

    anna.steuerung.anrufen(abwesend, true).unwrap();

    let ende = anna
        .warten_auf(|e| matches!(e, AnrufEreignis::Beendet { .. }))
        .await;
    assert_eq!(
        ende,
        AnrufEreignis::Beendet {
            peer: abwesend,
            grund: "User is offline.".into(),
        }
    );
}

#[tokio::test]
async fn presence_aenderung_erreicht_die_oberflaeche() {
    let (adresse, _state, _shutdown) = server_starten().await;
    let mut anna = Teilnehmer::anmelden(adresse, "tok-anna").await;

    let ben = Teilnehmer::anmelden(adresse, "tok-ben").await;
    anna.warten_auf(|e| {
        *e == AnrufEreignis::PresenceGeaendert {
            geaendert: Some(ben.id),
        }
    })
    .await;

    anna.steuerung.presence_auffrischen().unwrap();
    anna.warten_auf(|e| *e == AnrufEreignis::PresenceGeaendert { geaendert: None })
        .await;
}

#[tokio::test]
async fn falsches_token() {
    let (adresse, _state, _shutdown) = server_starten().await;
    assert!(matches!(
        SignalingClient::verbinden(adresse, "falsch").await,
        Err(fernruf_client::AnrufFehler::AnmeldungAbgelehnt(_))
    ));
}
