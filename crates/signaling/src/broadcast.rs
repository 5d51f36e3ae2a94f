//! Event-Broadcaster – Sendet Server-Ereignisse an verbundene Clients
//!
//! Der EventBroadcaster verwaltet die Send-Queues aller Verbindungen. Jede
//! Verbindung liest ihre Queue im eigenen Task und schreibt auf den Socket;
//! Senden ist daher nie blockierend.
//!
//! Das Abloesen einer Verbindung laeuft nicht ueber die Queue, sondern ueber
//! ein eigenes `watch`-Signal pro Verbindung. Eine volle Queue kann es daher
//! nicht verschlucken.
//!
//! `presence_verteilen` haengt an den Events der Registry und schickt bei
//! jeder Aenderung ein `online-status` an alle. Es wird nichts gedifft:
//! Clients holen den aktuellen Stand selbst neu.

use dashmap::DashMap;
use fernruf_core::types::VerbindungsId;
use fernruf_protocol::signal::{OnlineStatus, ServerSignal};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::presence::PresenceRegistry;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung: VerbindungsId,
    pub tx: mpsc::Sender<ServerSignal>,
    abgeloest: Arc<watch::Sender<bool>>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ServerSignal) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    verbindung = %self.verbindung,
                    event = n.name(),
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(verbindung = %self.verbindung, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Zentraler Event-Broadcaster fuer alle Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    clients: DashMap<VerbindungsId, ClientSender>,
    queue_groesse: usize,
}

impl EventBroadcaster {
    pub fn neu(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                clients: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    pub fn verbindung_registrieren(&self, verbindung: VerbindungsId) -> mpsc::Receiver<ServerSignal> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let (abgeloest, _) = watch::channel(false);
        self.inner.clients.insert(
            verbindung,
            ClientSender {
                verbindung,
                tx,
                abgeloest: Arc::new(abgeloest),
            },
        );
        tracing::debug!(verbindung = %verbindung, "Verbindung im Broadcaster registriert");
        rx
    }

    /// Signal, das `true` wird sobald die Verbindung abgeloest ist
    pub fn abloesung_abonnieren(&self, verbindung: &VerbindungsId) -> Option<watch::Receiver<bool>> {
        self.inner
            .clients
            .get(verbindung)
            .map(|s| s.abgeloest.subscribe())
    }

    /// Fordert eine Verbindung auf, sich mit `session-replaced` zu beenden
    ///
    /// Unabhaengig vom Fuellstand der Send-Queue. Gibt `false` zurueck wenn
    /// die Verbindung nicht (mehr) registriert ist.
    pub fn abloesen(&self, verbindung: &VerbindungsId) -> bool {
        match self.inner.clients.get(verbindung) {
            Some(s) => {
                s.abgeloest.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn verbindung_entfernen(&self, verbindung: &VerbindungsId) {
        if self.inner.clients.remove(verbindung).is_some() {
            tracing::debug!(verbindung = %verbindung, "Verbindung aus Broadcaster entfernt");
        }
    }

    /// Sendet eine Nachricht an eine einzelne Verbindung
    ///
    /// Gibt `true` zurueck wenn die Nachricht eingereiht wurde.
    pub fn an_verbindung_senden(&self, verbindung: &VerbindungsId, nachricht: ServerSignal) -> bool {
        // Sender klonen, damit der DashMap-Shard nicht waehrend try_send gesperrt bleibt
        let sender = match self.inner.clients.get(verbindung) {
            Some(s) => s.clone(),
            None => {
                tracing::debug!(verbindung = %verbindung, "Senden an unbekannte Verbindung");
                return false;
            }
        };
        sender.senden(nachricht)
    }

    /// Sendet eine Nachricht an alle Verbindungen
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_alle_senden(&self, nachricht: ServerSignal) -> usize {
        let sender: Vec<ClientSender> = self
            .inner
            .clients
            .iter()
            .map(|e| e.value().clone())
            .collect();

        sender
            .iter()
            .filter(|s| s.senden(nachricht.clone()))
            .count()
    }

}

// ---------------------------------------------------------------------------
// Presence-Verteilung
// ---------------------------------------------------------------------------

/// Startet den Task, der Presence-Aenderungen als `online-status` verteilt
///
/// Laeuft bis `shutdown_rx` `true` meldet. Verpasste Events (Lagged) werden
/// als eine unspezifische Aenderung weitergegeben.
pub fn presence_verteilen(
    registry: &PresenceRegistry,
    broadcaster: EventBroadcaster,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut events = registry.events_abonnieren();

    tokio::spawn(async move {
        loop {
            let geaendert = tokio::select! {
                event = events.recv() => match event {
                    Ok(e) => Some(e.user_id()),
                    Err(broadcast::error::RecvError::Lagged(verpasst)) => {
                        tracing::debug!(verpasst, "Presence-Events verpasst");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let gesendet = broadcaster.an_alle_senden(ServerSignal::OnlineStatus(OnlineStatus {
                changed_user_id: geaendert,
            }));
            tracing::trace!(gesendet, "online-status verteilt");
        }
        tracing::debug!("Presence-Verteilung beendet");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
