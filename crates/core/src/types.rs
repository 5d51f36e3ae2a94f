//! Gemeinsame Identifikationstypen fuer Fernruf
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Identitaet (stabil) und Verbindung (fluechtig) zur Compilezeit
//! auszuschliessen.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Eindeutige, stabile Benutzer-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Erstellt eine neue zufaellige UserId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Globaler Zaehler fuer Verbindungs-Handles (0 ist reserviert)
static VERBINDUNGS_ZAEHLER: AtomicU64 = AtomicU64::new(1);

/// Opakes Handle einer einzelnen Transportverbindung
///
/// Wird pro akzeptierter Verbindung einmalig vergeben und nie wiederverwendet.
/// Eine Identitaet kann ueber die Zeit viele Handles haben, aber nur eines
/// ist gleichzeitig gebunden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerbindungsId(pub u64);

impl VerbindungsId {
    /// Vergibt das naechste freie Handle (monoton steigend)
    pub fn naechste() -> Self {
        Self(VERBINDUNGS_ZAEHLER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Rolle einer Identitaet
///
/// Die beiden Kategorien schliessen sich gegenseitig aus. Sie filtern nur
/// die Kandidatenliste des Verzeichnisses; der Relay wertet sie nicht aus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rolle {
    Berater,
    Klient,
}

impl Rolle {
    /// Gibt die jeweils andere Kategorie zurueck
    pub fn gegenteil(&self) -> Self {
        match self {
            Rolle::Berater => Rolle::Klient,
            Rolle::Klient => Rolle::Berater,
        }
    }
}

impl std::fmt::Display for Rolle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rolle::Berater => write!(f, "berater"),
            Rolle::Klient => write!(f, "klient"),
        }
    }
}

/// Authentifizierte Identitaet (ID, Anzeigename, Rolle)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identitaet {
    pub id: UserId,
    pub name: String,
    pub rolle: Rolle,
}

impl Identitaet {
    pub fn neu(id: UserId, name: impl Into<String>, rolle: Rolle) -> Self {
        Self {
            id,
            name: name.into(),
            rolle,
        }
    }
}
