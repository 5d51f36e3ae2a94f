//! Adaptive Qualitaetsregelung
//!
//! Solange eine Sitzung verbunden ist, tastet ein Task jede Sekunde die
//! Transportstatistik ab und passt die Encoder-Obergrenzen an:
//!
//! ```text
//! schlecht = RTT > 300 ms  ODER  Verlust > 3 %  ODER  Bildrate < 15
//! 2 schlechte Ticks in Folge  -> Stufe - 1 (min 0)
//! 10 gute Ticks in Folge      -> Stufe + 1 (max 3)
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AnrufConfig;
use crate::medien::{Kodierung, MedienSitzung, Statistik, TransportMelder};

/// Hoechste Stufe, Startwert jeder Sitzung
pub const HOECHSTE_STUFE: u8 = 3;

/// Encoder-Obergrenzen je Stufe (Index = Stufe)
pub const STUFEN: [Kodierung; 4] = [
    Kodierung { max_bitrate_kbps: 150, max_fps: 10 },
    Kodierung { max_bitrate_kbps: 400, max_fps: 15 },
    Kodierung { max_bitrate_kbps: 800, max_fps: 24 },
    Kodierung { max_bitrate_kbps: 1500, max_fps: 30 },
];

pub fn kodierung_fuer(stufe: u8) -> Kodierung {
    STUFEN[usize::from(stufe.min(HOECHSTE_STUFE))]
}

/// Zustand des Reglers ohne Zeitbezug
#[derive(Debug, Clone)]
pub struct QualitaetsRegler {
    stufe: u8,
    schlecht_in_folge: u32,
    gut_in_folge: u32,
    config: AnrufConfig,
}

impl QualitaetsRegler {
    pub fn neu(config: AnrufConfig) -> Self {
        Self::mit_stufe(config, HOECHSTE_STUFE)
    }

    pub fn mit_stufe(config: AnrufConfig, stufe: u8) -> Self {
        Self {
            stufe: stufe.min(HOECHSTE_STUFE),
            schlecht_in_folge: 0,
            gut_in_folge: 0,
            config,
        }
    }

    pub fn stufe(&self) -> u8 {
        self.stufe
    }

    /// Fehlende Messwerte zaehlen nicht als schlecht
    pub fn ist_schlecht(&self, statistik: &Statistik) -> bool {
        let rtt = statistik.rtt.is_some_and(|rtt| rtt > self.config.rtt_grenze);
        let verlust = statistik.verlust > self.config.verlust_grenze;
        let fps = statistik.fps.is_some_and(|fps| fps < self.config.fps_grenze);
        rtt || verlust || fps
    }

    /// Verarbeitet einen Tick, gibt die neue Stufe bei einer Aenderung zurueck
    pub fn abtasten(&mut self, statistik: &Statistik) -> Option<u8> {
        if self.ist_schlecht(statistik) {
            self.gut_in_folge = 0;
            self.schlecht_in_folge += 1;
            if self.schlecht_in_folge >= self.config.ticks_runter {
                self.schlecht_in_folge = 0;
                if self.stufe > 0 {
                    self.stufe -= 1;
                    return Some(self.stufe);
                }
            }
        } else {
            self.schlecht_in_folge = 0;
            self.gut_in_folge += 1;
            if self.gut_in_folge >= self.config.ticks_hoch {
                self.gut_in_folge = 0;
                if self.stufe < HOECHSTE_STUFE {
                    self.stufe += 1;
                    return Some(self.stufe);
                }
            }
        }
        None
    }
}

/// Startet die Abtastung fuer eine verbundene Sitzung
///
/// Der Aufrufer besitzt den `JoinHandle` und bricht ihn ab, sobald die
/// Sitzung `Verbunden` verlaesst.
pub(crate) fn ueberwachen(
    sitzung: Arc<dyn MedienSitzung>,
    mut regler: QualitaetsRegler,
    melder: TransportMelder,
) -> JoinHandle<()> {
    let intervall = regler.config.abtast_intervall;
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + intervall;
        let mut takt = tokio::time::interval_at(start, intervall);
        takt.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            takt.tick().await;

            let statistik = match sitzung.statistik_abfragen().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(peer = %melder.peer(), fehler = %e, "Keine Statistik");
                    continue;
                }
            };

            if let Some(stufe) = regler.abtasten(&statistik) {
                let kodierung = kodierung_fuer(stufe);
                tracing::info!(
                    peer = %melder.peer(),
                    stufe,
                    bitrate_kbps = kodierung.max_bitrate_kbps,
                    fps = kodierung.max_fps,
                    "Qualitaetsstufe geaendert"
                );
                if let Err(e) = sitzung.kodierung_begrenzen(kodierung).await {
                    tracing::warn!(peer = %melder.peer(), fehler = %e, "Encoder-Grenzen nicht gesetzt");
                }
                melder.qualitaet(stufe);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gut() -> Statistik {
        Statistik {
            rtt: Some(Duration::from_millis(50)),
            verlust: 0.0,
            fps: Some(30.0),
        }
    }

    fn hohe_rtt() -> Statistik {
        Statistik {
            rtt: Some(Duration::from_millis(450)),
            ..gut()
        }
    }

    #[test]
    fn tabelle() {
        assert_eq!(kodierung_fuer(3), Kodierung { max_bitrate_kbps: 1500, max_fps: 30 });
        assert_eq!(kodierung_fuer(2), Kodierung { max_bitrate_kbps: 800, max_fps: 24 });
        assert_eq!(kodierung_fuer(1), Kodierung { max_bitrate_kbps: 400, max_fps: 15 });
        assert_eq!(kodierung_fuer(0), Kodierung { max_bitrate_kbps: 150, max_fps: 10 });
    }

    #[test]
    fn schwellwerte() {
        let r = QualitaetsRegler::neu(AnrufConfig::default());
        assert!(!r.ist_schlecht(&gut()));
        assert!(r.ist_schlecht(&hohe_rtt()));
        assert!(r.ist_schlecht(&Statistik { verlust: 0.05, ..gut() }));
        assert!(r.ist_schlecht(&Statistik { fps: Some(12.0), ..gut() }));
        // Grenzwerte selbst sind noch gut
        assert!(!r.ist_schlecht(&Statistik {
            rtt: Some(Duration::from_millis(300)),
            verlust: 0.03,
            fps: Some(15.0),
        }));
        // Nur-Audio ohne Bildrate
        assert!(!r.ist_schlecht(&Statistik { fps: None, ..gut() }));
    }

    #[test]
    fn ein_schlechter_tick_aendert_nichts() {
        let mut r = QualitaetsRegler::neu(AnrufConfig::default());
        assert_eq!(r.abtasten(&hohe_rtt()), None);
        assert_eq!(r.stufe(), 3);
    }

    #[test]
    fn zwei_schlechte_ticks_senken_um_eins() {
        let mut r = QualitaetsRegler::neu(AnrufConfig::default());
        r.abtasten(&hohe_rtt());
        assert_eq!(r.abtasten(&hohe_rtt()), Some(2));
        // Zaehler wurde zurueckgesetzt
        assert_eq!(r.abtasten(&hohe_rtt()), None);
        assert_eq!(r.abtasten(&hohe_rtt()), Some(1));
    }

    #[test]
    fn guter_tick_unterbricht_folge() {
        let mut r = QualitaetsRegler::neu(AnrufConfig::default());
        r.abtasten(&hohe_rtt());
        r.abtasten(&gut());
        assert_eq!(r.abtasten(&hohe_rtt()), None);
        assert_eq!(r.stufe(), 3);
    }

    #[test]
    fn boden_bei_null() {
        let mut r = QualitaetsRegler::mit_stufe(AnrufConfig::default(), 0);
        for _ in 0..6 {
            assert_eq!(r.abtasten(&hohe_rtt()), None);
        }
        assert_eq!(r.stufe(), 0);
    }

    #[test]
    fn zehn_gute_ticks_heben_um_eins() {
        let mut r = QualitaetsRegler::mit_stufe(AnrufConfig::default(), 1);
        for _ in 0..9 {
            assert_eq!(r.abtasten(&gut()), None);
        }
        assert_eq!(r.abtasten(&gut()), Some(2));
    }

    #[test]
    fn schlechter_tick_setzt_gute_folge_zurueck() {
        let mut r = QualitaetsRegler::mit_stufe(AnrufConfig::default(), 1);
        for _ in 0..9 {
            r.abtasten(&gut());
        }
        r.abtasten(&hohe_rtt());
        for _ in 0..9 {
            assert_eq!(r.abtasten(&gut()), None);
        }
        assert_eq!(r.abtasten(&gut()), Some(2));
    }

    #[test]
    fn decke_bei_drei() {
        let mut r = QualitaetsRegler::neu(AnrufConfig::default());
        for _ in 0..30 {
            assert_eq!(r.abtasten(&gut()), None);
        }
        assert_eq!(r.stufe(), HOECHSTE_STUFE);
    }
}
