//! fernruf-client – Anruf-Steuerung auf Client-Seite
//!
//! ```text
//! Oberflaeche --anrufen/annehmen/ablehnen/auflegen--> AnrufSteuerung
//!                                                          |
//!                                                          v
//! SignalingClient <--ClientSignal/ServerSignal--> AnrufManager --> MedienSitzung
//!                                                          |            |
//!                     AnrufEreignis (broadcast) <----------+   TransportMelder
//! ```
//!
//! Die Medien-Schicht selbst ist nicht Teil dieses Crates; sie wird ueber
//! `MedienFabrik`/`MedienSitzung` angebunden.

pub mod anruf;
pub mod config;
pub mod ereignisse;
pub mod error;
pub mod medien;
pub mod qualitaet;
pub mod verbindung;

#[cfg(test)]
mod testhilfe;

pub use anruf::{AnrufManager, AnrufSteuerung, SitzungsInfo};
pub use config::AnrufConfig;
pub use ereignisse::{AnrufEreignis, AnrufZustand};
pub use error::{AnrufFehler, AnrufResult, MedienFehler};
pub use medien::{
    Kodierung, MedienFabrik, MedienSitzung, Statistik, TransportMelder, TransportZustand,
};
pub use qualitaet::QualitaetsRegler;
pub use verbindung::SignalingClient;
