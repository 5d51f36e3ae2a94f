//! Presence-Registry – Wer ist ueber welche Verbindung erreichbar?
//!
//! Bidirektionale Zuordnung Identitaet <-> Verbindung. Pro Identitaet ist
//! hoechstens eine Verbindung gebunden; ein neues `binden` ersetzt die
//! vorherige stillschweigend. Jede wirksame Aenderung wird als
//! `PresenceEvent` an Abonnenten verteilt.
//!
//! Lookups dominieren, daher ein `RwLock` ueber beiden Indizes. Beide
//! Indizes werden immer unter derselben Schreibsperre geaendert.

use fernruf_core::types::{Identitaet, Rolle, UserId, VerbindungsId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Presence-Events
// ---------------------------------------------------------------------------

/// Events die die Registry versendet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Identitaet ist jetzt ueber `verbindung` erreichbar
    Gebunden {
        user_id: UserId,
        verbindung: VerbindungsId,
        abgeloest: Option<VerbindungsId>,
    },
    /// Identitaet ist nicht mehr erreichbar
    Geloest {
        user_id: UserId,
        verbindung: VerbindungsId,
    },
}

impl PresenceEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            PresenceEvent::Gebunden { user_id, .. } | PresenceEvent::Geloest { user_id, .. } => {
                *user_id
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Eintraege
// ---------------------------------------------------------------------------

/// Presence-Eintrag einer Identitaet
#[derive(Debug, Clone)]
struct PresenceEintrag {
    identitaet: Identitaet,
    verbindung: Option<VerbindungsId>,
    online: bool,
}

/// Ergebnis von `list_by_category`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStatus {
    pub identitaet: Identitaet,
    pub online: bool,
}

#[derive(Default)]
struct Zustand {
    /// Identitaet -> Eintrag (bleibt nach dem Trennen als offline erhalten)
    eintraege: HashMap<UserId, PresenceEintrag>,
    /// Verbindung -> Identitaet, nur fuer aktuell gebundene Verbindungen
    rueckwaerts: HashMap<VerbindungsId, UserId>,
}

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

/// Live-Zuordnung zwischen Identitaeten und Verbindungen
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<PresenceRegistryInner>,
}

struct PresenceRegistryInner {
    zustand: RwLock<Zustand>,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceRegistry {
    pub fn neu() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(PresenceRegistryInner {
                zustand: RwLock::new(Zustand::default()),
                event_tx,
            }),
        }
    }

    /// Bindet `identitaet` an `verbindung` und ersetzt eine vorherige Bindung
    ///
    /// Gibt die abgeloeste Verbindung zurueck, falls es eine gab.
    pub fn bind(&self, identitaet: Identitaet, verbindung: VerbindungsId) -> Option<VerbindungsId> {
        let user_id = identitaet.id;
        let abgeloest = {
            let mut zustand = self.inner.zustand.write();
            let vorher = zustand
                .eintraege
                .insert(
                    user_id,
                    PresenceEintrag {
                        identitaet,
                        verbindung: Some(verbindung),
                        online: true,
                    },
                )
                .and_then(|e| e.verbindung)
                .filter(|alt| *alt != verbindung);
            if let Some(alt) = vorher {
                zustand.rueckwaerts.remove(&alt);
            }
            zustand.rueckwaerts.insert(verbindung, user_id);
            vorher
        };

        match abgeloest {
            Some(alt) => tracing::info!(
                user_id = %user_id,
                verbindung = %verbindung,
                abgeloest = %alt,
                "Identitaet neu gebunden, vorherige Verbindung abgeloest"
            ),
            None => tracing::info!(user_id = %user_id, verbindung = %verbindung, "Identitaet online"),
        }

        let _ = self.inner.event_tx.send(PresenceEvent::Gebunden {
            user_id,
            verbindung,
            abgeloest,
        });
        abgeloest
    }

    /// Loest die Bindung von `verbindung`
    ///
    /// Wirkt nur, wenn die Identitaet noch genau an diese Verbindung gebunden
    /// ist. Ein verspaetetes Trennen einer bereits abgeloesten Verbindung
    /// aendert nichts. Gibt die betroffene Identitaet zurueck.
    pub fn unbind(&self, verbindung: VerbindungsId) -> Option<UserId> {
        let user_id = {
            let mut guard = self.inner.zustand.write();
            let zustand = &mut *guard;
            let user_id = zustand.rueckwaerts.remove(&verbindung)?;
            let eintrag = zustand.eintraege.get_mut(&user_id)?;
            if eintrag.verbindung != Some(verbindung) {
                return None;
            }
            eintrag.verbindung = None;
            eintrag.online = false;
            user_id
        };

        tracing::info!(user_id = %user_id, verbindung = %verbindung, "Identitaet offline");
        let _ = self.inner.event_tx.send(PresenceEvent::Geloest {
            user_id,
            verbindung,
        });
        Some(user_id)
    }

    /// Aktuelle Verbindung einer Identitaet
    pub fn lookup(&self, user_id: &UserId) -> Option<VerbindungsId> {
        self.inner
            .zustand
            .read()
            .eintraege
            .get(user_id)
            .and_then(|e| e.verbindung)
    }

    /// Alle bekannten Identitaeten einer Kategorie mit Online-Status
    pub fn list_by_category(&self, rolle: Rolle) -> Vec<PresenceStatus> {
        let mut liste: Vec<PresenceStatus> = self
            .inner
            .zustand
            .read()
            .eintraege
            .values()
            .filter(|e| e.identitaet.rolle == rolle)
            .map(|e| PresenceStatus {
                identitaet: e.identitaet.clone(),
                online: e.online,
            })
            .collect();
        liste.sort_by(|a, b| a.identitaet.name.cmp(&b.identitaet.name));
        liste
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.lookup(user_id).is_some()
    }

    /// Anzahl aktuell gebundener Identitaeten
    pub fn online_anzahl(&self) -> usize {
        self.inner.zustand.read().rueckwaerts.len()
    }

    /// Abonniert Presence-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn identitaet(name: &str, rolle: Rolle) -> Identitaet {
        Identitaet::neu(UserId::new(), name, rolle)
    }

    #[test]
    fn binden_und_loesen() {
        let reg = PresenceRegistry::neu();
        let anna = identitaet("Anna", Rolle::Berater);
        let h1 = VerbindungsId::naechste();

        assert_eq!(reg.bind(anna.clone(), h1), None);
        assert_eq!(reg.lookup(&anna.id), Some(h1));
        assert_eq!(reg.online_anzahl(), 1);

        assert_eq!(reg.unbind(h1), Some(anna.id));
        assert_eq!(reg.lookup(&anna.id), None);
        assert_eq!(reg.online_anzahl(), 0);
    }

    #[test]
    fn neue_bindung_ersetzt_alte() {
        let reg = PresenceRegistry::neu();
        let anna = identitaet("Anna", Rolle::Berater);
        let h1 = VerbindungsId::naechste();
        let h2 = VerbindungsId::naechste();

        reg.bind(anna.clone(), h1);
        assert_eq!(reg.bind(anna.clone(), h2), Some(h1));
        assert_eq!(reg.lookup(&anna.id), Some(h2));
        assert_eq!(reg.online_anzahl(), 1);
    }

    #[test]
    fn verspaetetes_loesen_der_alten_verbindung_ist_wirkungslos() {
        let reg = PresenceRegistry::neu();
        let anna = identitaet("Anna", Rolle::Berater);
        let h1 = VerbindungsId::naechste();
        let h2 = VerbindungsId::naechste();

        reg.bind(anna.clone(), h1);
        reg.bind(anna.clone(), h2);

        assert_eq!(reg.unbind(h1), None);
        assert_eq!(reg.lookup(&anna.id), Some(h2));
    }

    #[test]
    fn loesen_unbekannter_verbindung() {
        let reg = PresenceRegistry::neu();
        assert_eq!(reg.unbind(VerbindungsId::naechste()), None);
    }

    #[test]
    fn eintrag_bleibt_offline_erhalten() {
        let reg = PresenceRegistry::neu();
        let ben = identitaet("Ben", Rolle::Klient);
        let h = VerbindungsId::naechste();

        reg.bind(ben.clone(), h);
        reg.unbind(h);

        assert_eq!(reg.lookup(&ben.id), None);
        let klienten = reg.list_by_category(Rolle::Klient);
        assert_eq!(klienten.len(), 1);
        assert_eq!(klienten[0].identitaet, ben);
        assert!(!klienten[0].online);
    }

    #[test]
    fn liste_nach_kategorie() {
        let reg = PresenceRegistry::neu();
        let anna = identitaet("Anna", Rolle::Berater);
        let ben = identitaet("Ben", Rolle::Klient);
        let cara = identitaet("Cara", Rolle::Klient);
        let h_ben = VerbindungsId::naechste();

        reg.bind(anna, VerbindungsId::naechste());
        reg.bind(ben.clone(), h_ben);
        reg.bind(cara.clone(), VerbindungsId::naechste());
        reg.unbind(h_ben);

        let klienten = reg.list_by_category(Rolle::Klient);
        assert_eq!(klienten.len(), 2);
        assert_eq!(klienten[0].identitaet, ben);
        assert!(!klienten[0].online);
        assert_eq!(klienten[1].identitaet, cara);
        assert!(klienten[1].online);
    }

    #[test]
    fn clone_teilt_inneren_state() {
        let reg1 = PresenceRegistry::neu();
        let reg2 = reg1.clone();
        let anna = identitaet("Anna", Rolle::Berater);

        reg1.bind(anna.clone(), VerbindungsId::naechste());
        assert!(reg2.ist_online(&anna.id));
    }

    #[tokio::test]
    async fn events_bei_wirksamen_aenderungen() {
        let reg = PresenceRegistry::neu();
        let mut rx = reg.events_abonnieren();
        let anna = identitaet("Anna", Rolle::Berater);
        let h1 = VerbindungsId::naechste();
        let h2 = VerbindungsId::naechste();

        reg.bind(anna.clone(), h1);
        reg.bind(anna.clone(), h2);
        reg.unbind(h1); // wirkungslos, kein Event
        reg.unbind(h2);

        assert_eq!(
            rx.try_recv().unwrap(),
            PresenceEvent::Gebunden {
                user_id: anna.id,
                verbindung: h1,
                abgeloest: None
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PresenceEvent::Gebunden {
                user_id: anna.id,
                verbindung: h2,
                abgeloest: Some(h1)
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PresenceEvent::Geloest {
                user_id: anna.id,
                verbindung: h2
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
