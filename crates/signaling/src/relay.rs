//! Signaling-Relay – Leitet Signale zwischen zwei Identitaeten weiter
//!
//! Reiner Router ohne eigenen Zustand. Pro eingehendem Signal:
//! 1. Nutzlast wird validiert
//! 2. Absender muss die authentifizierte Identitaet der Verbindung sein und
//!    die Verbindung muss noch die gebundene dieser Identitaet sein
//! 3. Rate-Limit pro Identitaet pruefen
//! 4. Ziel in der Registry nachschlagen; offline -> `call-error` nur fuer
//!    Anruf-Angebote, alles andere wird verworfen
//! 5. Online -> unveraendert an die Zielverbindung einreihen
//!
//! Keine Wiederholung, keine Pufferung fuer Offline-Empfaenger.

use fernruf_core::types::{Identitaet, VerbindungsId};
use fernruf_observability::FernrufMetrics;
use fernruf_protocol::signal::{
    ClientSignal, OnlineStatus, ServerSignal, Signal, SignalArt, Umwandlung,
};
use std::sync::Arc;

use crate::broadcast::EventBroadcaster;
use crate::presence::PresenceRegistry;
use crate::rate_limit::SignalRateLimiter;

/// Warum ein Signal nicht zugestellt wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerwerfGrund {
    /// Behaupteter Absender passt nicht zur Verbindung
    Gefaelscht,
    /// Verbindung ist nicht mehr die gebundene der Identitaet
    Abgeloest,
    /// Nutzlast verletzt Groessen- oder Typregeln
    Ungueltig,
    /// Rate-Limit der Identitaet ueberschritten
    RateLimit,
    /// Ziel nicht gebunden (kein Angebot)
    Offline,
    /// Send-Queue des Ziels voll oder geschlossen
    QueueVoll,
    /// Ereignis ist kein Relay-Signal
    KeinSignal,
}

impl VerwerfGrund {
    pub fn als_str(&self) -> &'static str {
        match self {
            VerwerfGrund::Gefaelscht => "spoofing",
            VerwerfGrund::Abgeloest => "superseded",
            VerwerfGrund::Ungueltig => "invalid",
            VerwerfGrund::RateLimit => "rate_limit",
            VerwerfGrund::Offline => "offline",
            VerwerfGrund::QueueVoll => "queue_full",
            VerwerfGrund::KeinSignal => "not_a_signal",
        }
    }
}

/// Ergebnis einer Weiterleitung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErgebnis {
    Zugestellt(SignalArt),
    /// Angebot an Offline-Ziel, `call-error` an den Absender gesendet
    OfflineGemeldet,
    Verworfen(VerwerfGrund),
}

/// Router fuer Signale zwischen gebundenen Verbindungen
#[derive(Clone)]
pub struct SignalingRelay {
    registry: PresenceRegistry,
    broadcaster: EventBroadcaster,
    limiter: Arc<SignalRateLimiter>,
    metriken: FernrufMetrics,
}

impl SignalingRelay {
    pub fn neu(
        registry: PresenceRegistry,
        broadcaster: EventBroadcaster,
        limiter: Arc<SignalRateLimiter>,
        metriken: FernrufMetrics,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            limiter,
            metriken,
        }
    }

    /// Verarbeitet ein Relay-Ereignis der Verbindung `verbindung`
    ///
    /// `absender` ist die beim Handshake authentifizierte Identitaet.
    pub fn weiterleiten(
        &self,
        absender: &Identitaet,
        verbindung: VerbindungsId,
        nachricht: ClientSignal,
    ) -> RelayErgebnis {
        let ergebnis = self.weiterleiten_intern(absender, verbindung, nachricht);
        match ergebnis {
            RelayErgebnis::Zugestellt(art) => self.metriken.weitergeleitet(art.als_str()),
            RelayErgebnis::OfflineGemeldet => self.metriken.offline_fehler.inc(),
            RelayErgebnis::Verworfen(grund) => {
                if grund == VerwerfGrund::RateLimit {
                    self.metriken.rate_limitiert.inc();
                }
                self.metriken.verworfen(grund.als_str());
            }
        }
        ergebnis
    }

    fn weiterleiten_intern(
        &self,
        absender: &Identitaet,
        verbindung: VerbindungsId,
        nachricht: ClientSignal,
    ) -> RelayErgebnis {
        let event = nachricht.name();

        if let Err(fehler) = nachricht.validieren() {
            tracing::warn!(
                user_id = %absender.id,
                event,
                fehler = %fehler,
                "Ungueltige Nutzlast verworfen"
            );
            return RelayErgebnis::Verworfen(VerwerfGrund::Ungueltig);
        }

        let signal = match Signal::aus_client(nachricht, absender.id) {
            Umwandlung::Signal(s) => s,
            Umwandlung::Gefaelscht { behauptet } => {
                tracing::warn!(
                    user_id = %absender.id,
                    behauptet = %behauptet,
                    event,
                    "Absender passt nicht zur Verbindung – verworfen"
                );
                return RelayErgebnis::Verworfen(VerwerfGrund::Gefaelscht);
            }
            Umwandlung::KeinSignal => return RelayErgebnis::Verworfen(VerwerfGrund::KeinSignal),
        };

        if self.registry.lookup(&absender.id) != Some(verbindung) {
            tracing::warn!(
                user_id = %absender.id,
                verbindung = %verbindung,
                event,
                "Signal einer abgeloesten Verbindung verworfen"
            );
            return RelayErgebnis::Verworfen(VerwerfGrund::Abgeloest);
        }

        if !self.limiter.pruefen(&absender.id) {
            tracing::warn!(user_id = %absender.id, event, "Rate-Limit ueberschritten – verworfen");
            return RelayErgebnis::Verworfen(VerwerfGrund::RateLimit);
        }

        let art = signal.art();
        let ziel = signal.an;

        let ziel_verbindung = match self.registry.lookup(&ziel) {
            Some(h) => h,
            None if art == SignalArt::CallOffer => {
                tracing::debug!(user_id = %absender.id, ziel = %ziel, "Angebot an Offline-Ziel");
                self.broadcaster
                    .an_verbindung_senden(&verbindung, ServerSignal::offline(ziel));
                return RelayErgebnis::OfflineGemeldet;
            }
            None => {
                tracing::debug!(
                    user_id = %absender.id,
                    ziel = %ziel,
                    art = art.als_str(),
                    "Ziel offline – verworfen"
                );
                return RelayErgebnis::Verworfen(VerwerfGrund::Offline);
            }
        };

        let zustellung = signal.zustellung(&absender.name);
        if self.broadcaster.an_verbindung_senden(&ziel_verbindung, zustellung) {
            tracing::debug!(
                user_id = %absender.id,
                ziel = %ziel,
                art = art.als_str(),
                "Signal weitergeleitet"
            );
            RelayErgebnis::Zugestellt(art)
        } else {
            RelayErgebnis::Verworfen(VerwerfGrund::QueueVoll)
        }
    }

    /// `presence:refresh` – alle Clients sollen ihren Presence-Stand neu holen
    pub fn presence_auffrischen(&self, absender: &Identitaet) -> bool {
        if !self.limiter.pruefen(&absender.id) {
            tracing::warn!(user_id = %absender.id, "Rate-Limit fuer presence:refresh");
            self.metriken.rate_limitiert.inc();
            return false;
        }
        self.broadcaster
            .an_alle_senden(ServerSignal::OnlineStatus(OnlineStatus {
                changed_user_id: None,
            }));
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fernruf_core::types::{Rolle, UserId};
    use fernruf_protocol::medien::{AnrufMetadaten, IceKandidat, SessionBeschreibung};
    use fernruf_protocol::signal::{CallUser, EndCallAn, KandidatAn};
    use tokio::sync::mpsc;

    struct Umgebung {
        relay: SignalingRelay,
        registry: PresenceRegistry,
        broadcaster: EventBroadcaster,
        metriken: FernrufMetrics,
    }

    fn umgebung(limit: u32) -> Umgebung {
        let registry = PresenceRegistry::neu();
        let broadcaster = EventBroadcaster::neu(16);
        let metriken = FernrufMetrics::neu().unwrap();
        let relay = SignalingRelay::neu(
            registry.clone(),
            broadcaster.clone(),
            Arc::new(SignalRateLimiter::neu(limit)),
            metriken.clone(),
        );
        Umgebung {
            relay,
            registry,
            broadcaster,
            metriken,
        }
    }

    fn verbinden(
        u: &Umgebung,
        name: &str,
    ) -> (Identitaet, VerbindungsId, mpsc::Receiver<ServerSignal>) {
        let identitaet = Identitaet::neu(UserId::new(), name, Rolle::Klient);
        let h = VerbindungsId::naechste();
        let rx = u.broadcaster.verbindung_registrieren(h);
        u.registry.bind(identitaet.clone(), h);
        (identitaet, h, rx)
    }

    fn angebot(an: UserId, von: Option<UserId>) -> ClientSignal {
        ClientSignal::CallUser(CallUser {
            to_user_id: an,
            from_user_id: von,
            offer: SessionBeschreibung::angebot("v=0"),
            metadata: AnrufMetadaten::default(),
        })
    }

    #[tokio::test]
    async fn angebot_an_offline_ziel_meldet_fehler_nur_an_absender() {
        let u = umgebung(0);
        let (anna, h_anna, mut rx_anna) = verbinden(&u, "Anna");
        let (_cara, _h_cara, mut rx_cara) = verbinden(&u, "Cara");
        let ben = UserId::new();

        let ergebnis = u.relay.weiterleiten(&anna, h_anna, angebot(ben, None));
        assert_eq!(ergebnis, RelayErgebnis::OfflineGemeldet);

        assert_eq!(rx_anna.try_recv().unwrap(), ServerSignal::offline(ben));
        assert!(rx_anna.try_recv().is_err());
        assert!(rx_cara.try_recv().is_err());
        assert_eq!(u.metriken.offline_fehler.get(), 1);
    }

    #[tokio::test]
    async fn andere_signale_an_offline_ziel_still_verworfen() {
        let u = umgebung(0);
        let (anna, h_anna, mut rx_anna) = verbinden(&u, "Anna");

        let ende = ClientSignal::EndCall(EndCallAn {
            to_user_id: UserId::new(),
            from_user_id: None,
            reason: "hangup".into(),
        });
        assert_eq!(
            u.relay.weiterleiten(&anna, h_anna, ende),
            RelayErgebnis::Verworfen(VerwerfGrund::Offline)
        );
        assert!(rx_anna.try_recv().is_err());
    }

    #[tokio::test]
    async fn zustellung_mit_authentifiziertem_absender() {
        let u = umgebung(0);
        let (anna, h_anna, _rx_anna) = verbinden(&u, "Anna");
        let (ben, _h_ben, mut rx_ben) = verbinden(&u, "Ben");

        let ergebnis = u
            .relay
            .weiterleiten(&anna, h_anna, angebot(ben.id, Some(anna.id)));
        assert_eq!(ergebnis, RelayErgebnis::Zugestellt(SignalArt::CallOffer));

        match rx_ben.try_recv().unwrap() {
            ServerSignal::IncomingCall(ic) => {
                assert_eq!(ic.from_user_id, anna.id);
                assert_eq!(ic.from_name, "Anna");
                assert_eq!(ic.offer.sdp, "v=0");
            }
            andere => panic!("Erwartet incoming-call, bekam {:?}", andere),
        }
    }

    #[tokio::test]
    async fn gefaelschter_absender_wird_verworfen() {
        let u = umgebung(0);
        let (anna, h_anna, mut rx_anna) = verbinden(&u, "Anna");
        let (ben, _h_ben, mut rx_ben) = verbinden(&u, "Ben");

        let kandidat = ClientSignal::IceCandidate(KandidatAn {
            to_user_id: ben.id,
            from_user_id: Some(UserId::new()),
            candidate: IceKandidat::neu("candidate:1"),
        });
        assert_eq!(
            u.relay.weiterleiten(&anna, h_anna, kandidat),
            RelayErgebnis::Verworfen(VerwerfGrund::Gefaelscht)
        );
        assert!(rx_ben.try_recv().is_err());
        assert!(rx_anna.try_recv().is_err());
    }

    #[tokio::test]
    async fn rate_limit_verwirft_ueberschuss() {
        let u = umgebung(2);
        let (anna, h_anna, _rx_anna) = verbinden(&u, "Anna");
        let (ben, _h_ben, mut rx_ben) = verbinden(&u, "Ben");

        for _ in 0..2 {
            assert!(matches!(
                u.relay.weiterleiten(&anna, h_anna, angebot(ben.id, None)),
                RelayErgebnis::Zugestellt(_)
            ));
        }
        assert_eq!(
            u.relay.weiterleiten(&anna, h_anna, angebot(ben.id, None)),
            RelayErgebnis::Verworfen(VerwerfGrund::RateLimit)
        );
        assert_eq!(u.metriken.rate_limitiert.get(), 1);

        assert!(rx_ben.try_recv().is_ok());
        assert!(rx_ben.try_recv().is_ok());
        assert!(rx_ben.try_recv().is_err());
    }

    #[tokio::test]
    async fn nach_neubindung_geht_signal_an_neue_verbindung() {
        let u = umgebung(0);
        let (anna, h_anna, _rx_anna) = verbinden(&u, "Anna");
        let (ben, h_alt, mut rx_alt) = verbinden(&u, "Ben");

        let h_neu = VerbindungsId::naechste();
        let mut rx_neu = u.broadcaster.verbindung_registrieren(h_neu);
        assert_eq!(u.registry.bind(ben.clone(), h_neu), Some(h_alt));

        u.relay.weiterleiten(&anna, h_anna, angebot(ben.id, None));
        assert!(rx_alt.try_recv().is_err());
        assert!(matches!(
            rx_neu.try_recv().unwrap(),
            ServerSignal::IncomingCall(_)
        ));
    }

    #[tokio::test]
    async fn abgeloeste_verbindung_darf_nicht_mehr_senden() {
        let u = umgebung(0);
        let (anna, h_alt, mut rx_alt) = verbinden(&u, "Anna");
        let (ben, _h_ben, mut rx_ben) = verbinden(&u, "Ben");

        let h_neu = VerbindungsId::naechste();
        let _rx_neu = u.broadcaster.verbindung_registrieren(h_neu);
        assert_eq!(u.registry.bind(anna.clone(), h_neu), Some(h_alt));

        assert_eq!(
            u.relay.weiterleiten(&anna, h_alt, angebot(ben.id, Some(anna.id))),
            RelayErgebnis::Verworfen(VerwerfGrund::Abgeloest)
        );
        assert!(rx_ben.try_recv().is_err());
        assert!(rx_alt.try_recv().is_err());
        assert_eq!(
            u.metriken
                .signale_verworfen
                .with_label_values(&["superseded"])
                .get(),
            1
        );

        // Die neue Verbindung leitet normal weiter
        assert_eq!(
            u.relay.weiterleiten(&anna, h_neu, angebot(ben.id, Some(anna.id))),
            RelayErgebnis::Zugestellt(SignalArt::CallOffer)
        );
        assert!(matches!(
            rx_ben.try_recv().unwrap(),
            ServerSignal::IncomingCall(_)
        ));
    }

    #[tokio::test]
    async fn ungebundene_verbindung_darf_nicht_senden() {
        let u = umgebung(0);
        let (anna, h_anna, _rx) = verbinden(&u, "Anna");
        let (ben, _h_ben, mut rx_ben) = verbinden(&u, "Ben");
        u.registry.unbind(h_anna);

        assert_eq!(
            u.relay.weiterleiten(&anna, h_anna, angebot(ben.id, None)),
            RelayErgebnis::Verworfen(VerwerfGrund::Abgeloest)
        );
        assert!(rx_ben.try_recv().is_err());
    }

    #[tokio::test]
    async fn ungueltiges_angebot_wird_verworfen() {
        let u = umgebung(0);
        let (anna, h_anna, _rx) = verbinden(&u, "Anna");
        let (ben, _h, mut rx_ben) = verbinden(&u, "Ben");

        let falsch = ClientSignal::CallUser(CallUser {
            to_user_id: ben.id,
            from_user_id: None,
            offer: SessionBeschreibung::antwort("v=0"),
            metadata: AnrufMetadaten::default(),
        });
        assert_eq!(
            u.relay.weiterleiten(&anna, h_anna, falsch),
            RelayErgebnis::Verworfen(VerwerfGrund::Ungueltig)
        );
        assert!(rx_ben.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_auffrischen_erreicht_alle() {
        let u = umgebung(0);
        let (anna, _h, mut rx_anna) = verbinden(&u, "Anna");
        let (_ben, _h2, mut rx_ben) = verbinden(&u, "Ben");

        assert!(u.relay.presence_auffrischen(&anna));
        assert!(matches!(
            rx_anna.try_recv().unwrap(),
            ServerSignal::OnlineStatus(_)
        ));
        assert!(matches!(
            rx_ben.try_recv().unwrap(),
            ServerSignal::OnlineStatus(_)
        ));
    }
}
