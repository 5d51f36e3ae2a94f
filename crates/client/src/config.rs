//! Zeiten und Schwellwerte des Anruf-Clients

use std::time::Duration;

/// Konfiguration fuer `AnrufManager` und Qualitaetsregler
#[derive(Debug, Clone)]
pub struct AnrufConfig {
    /// Wartezeit im Zustand `Wiederverbinden` bis zum ICE-Restart
    pub entprellung: Duration,
    /// Abtastintervall der Transportstatistik
    pub abtast_intervall: Duration,
    /// Round-Trip-Zeit, ab der ein Tick als schlecht gilt
    pub rtt_grenze: Duration,
    /// Paketverlust-Anteil (0..1), ab dem ein Tick als schlecht gilt
    pub verlust_grenze: f64,
    /// Empfangene Bildrate, unter der ein Tick als schlecht gilt
    pub fps_grenze: f64,
    /// Schlechte Ticks in Folge bis zur naechstniedrigeren Stufe
    pub ticks_runter: u32,
    /// Gute Ticks in Folge bis zur naechsthoeheren Stufe
    pub ticks_hoch: u32,
}

impl Default for AnrufConfig {
    fn default() -> Self {
        Self {
            entprellung: Duration::from_secs(2),
            abtast_intervall: Duration::from_secs(1),
            rtt_grenze: Duration::from_millis(300),
            verlust_grenze: 0.03,
            fps_grenze: 15.0,
            ticks_runter: 2,
            ticks_hoch: 10,
        }
    }
}
