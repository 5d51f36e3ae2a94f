//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services als Arc-Referenzen, die sicher zwischen
//! tokio-Tasks geteilt werden koennen.

use fernruf_observability::FernrufMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::auth::Authentifizierer;
use crate::broadcast::EventBroadcaster;
use crate::presence::PresenceRegistry;
use crate::rate_limit::SignalRateLimiter;
use crate::relay::SignalingRelay;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige TCP-Verbindungen (auch nicht authentifizierte)
    pub max_verbindungen: usize,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Zeit fuer das `authenticate`-Ereignis nach dem Verbindungsaufbau
    pub handshake_timeout_sek: u64,
    /// Weitergeleitete Signale pro Minute und Identitaet (0 = unbegrenzt)
    pub signale_pro_minute: u32,
    /// Groesse der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_verbindungen: 1024,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            handshake_timeout_sek: 10,
            signale_pro_minute: 600,
            send_queue_groesse: 64,
            max_frame_groesse: fernruf_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Presence-Registry (Identitaet <-> Verbindung)
    pub registry: PresenceRegistry,
    /// Send-Queues aller Verbindungen
    pub broadcaster: EventBroadcaster,
    pub relay: SignalingRelay,
    pub limiter: Arc<SignalRateLimiter>,
    /// Token-Pruefung gegen den Identitaetsdienst
    pub authentifizierer: Arc<dyn Authentifizierer>,
    pub metriken: FernrufMetrics,
    aktive_verbindungen: AtomicUsize,
}

impl SignalingState {
    pub fn neu(
        config: SignalingConfig,
        authentifizierer: Arc<dyn Authentifizierer>,
        metriken: FernrufMetrics,
    ) -> Arc<Self> {
        let registry = PresenceRegistry::neu();
        let broadcaster = EventBroadcaster::neu(config.send_queue_groesse);
        let limiter = Arc::new(SignalRateLimiter::neu(config.signale_pro_minute));
        let relay = SignalingRelay::neu(
            registry.clone(),
            broadcaster.clone(),
            Arc::clone(&limiter),
            metriken.clone(),
        );

        Arc::new(Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            relay,
            limiter,
            authentifizierer,
            metriken,
            aktive_verbindungen: AtomicUsize::new(0),
        })
    }

    /// Reserviert einen Verbindungsplatz, `None` wenn der Server voll ist
    pub fn verbindung_belegen(self: &Arc<Self>) -> Option<VerbindungsPlatz> {
        let max = self.config.max_verbindungen;
        self.aktive_verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| VerbindungsPlatz {
                state: Arc::clone(self),
            })
    }

    pub fn aktive_verbindungen(&self) -> usize {
        self.aktive_verbindungen.load(Ordering::Acquire)
    }

    /// Aktualisiert die Online-Gauge aus der Registry
    pub fn online_metrik_aktualisieren(&self) {
        self.metriken
            .online_verbindungen
            .set(self.registry.online_anzahl() as i64);
    }
}

/// Belegter Verbindungsplatz, wird beim Drop freigegeben
pub struct VerbindungsPlatz {
    state: Arc<SignalingState>,
}

impl Drop for VerbindungsPlatz {
    fn drop(&mut self) {
        self.state.aktive_verbindungen.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StatischeBenutzer;

    fn state(max: usize) -> Arc<SignalingState> {
        SignalingState::neu(
            SignalingConfig {
                max_verbindungen: max,
                ..Default::default()
            },
            Arc::new(StatischeBenutzer::default()),
            FernrufMetrics::neu().unwrap(),
        )
    }

    #[test]
    fn verbindungsplaetze_begrenzt() {
        let s = state(2);
        let a = s.verbindung_belegen().expect("Platz 1");
        let _b = s.verbindung_belegen().expect("Platz 2");
        assert!(s.verbindung_belegen().is_none());
        assert_eq!(s.aktive_verbindungen(), 2);

        drop(a);
        assert_eq!(s.aktive_verbindungen(), 1);
        assert!(s.verbindung_belegen().is_some());
    }

    #[test]
    fn standard_konfiguration() {
        let config = SignalingConfig::default();
        assert_eq!(config.signale_pro_minute, 600);
        assert!(config.verbindungs_timeout_sek > config.keepalive_sek);
    }
}
