//! Anbindung an den externen Identitaetsdienst
//!
//! Passwortpruefung und Session-Ausgabe liegen ausserhalb von Fernruf. Der
//! Signaling-Server sieht nur ein Token und fragt den `Authentifizierer`,
//! zu welcher Identitaet es gehoert. Das Verzeichnis liefert die Liste aller
//! bekannten Identitaeten fuer `GET /users/online`.

use async_trait::async_trait;
use fernruf_core::types::{Identitaet, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Fehler bei der Token-Pruefung
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFehler {
    #[error("Token unbekannt oder abgelaufen")]
    UngueltigesToken,

    #[error("Identitaetsdienst nicht erreichbar: {0}")]
    NichtErreichbar(String),
}

/// Prueft Tokens gegen den Identitaetsdienst
#[async_trait]
pub trait Authentifizierer: Send + Sync + 'static {
    async fn pruefen(&self, token: &str) -> Result<Identitaet, AuthFehler>;
}

/// Liste aller bekannten Identitaeten
#[async_trait]
pub trait Benutzerverzeichnis: Send + Sync + 'static {
    async fn alle_benutzer(&self) -> Vec<Identitaet>;
}

// ---------------------------------------------------------------------------
// Statische Tabelle
// ---------------------------------------------------------------------------

/// Token-Tabelle aus der Konfiguration (Entwicklung, Tests)
#[derive(Debug, Clone, Default)]
pub struct StatischeBenutzer {
    inner: Arc<StatischeBenutzerInner>,
}

#[derive(Debug, Default)]
struct StatischeBenutzerInner {
    nach_token: HashMap<String, Identitaet>,
    reihenfolge: Vec<UserId>,
}

impl StatischeBenutzer {
    pub fn neu<I>(eintraege: I) -> Self
    where
        I: IntoIterator<Item = (String, Identitaet)>,
    {
        let mut inner = StatischeBenutzerInner::default();
        for (token, identitaet) in eintraege {
            if !inner.reihenfolge.contains(&identitaet.id) {
                inner.reihenfolge.push(identitaet.id);
            }
            inner.nach_token.insert(token, identitaet);
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn anzahl(&self) -> usize {
        self.inner.reihenfolge.len()
    }
}

#[async_trait]
impl Authentifizierer for StatischeBenutzer {
    async fn pruefen(&self, token: &str) -> Result<Identitaet, AuthFehler> {
        self.inner
            .nach_token
            .get(token)
            .cloned()
            .ok_or(AuthFehler::UngueltigesToken)
    }
}

#[async_trait]
impl Benutzerverzeichnis for StatischeBenutzer {
    async fn alle_benutzer(&self) -> Vec<Identitaet> {
        self.inner
            .reihenfolge
            .iter()
            .filter_map(|id| {
                self.inner
                    .nach_token
                    .values()
                    .find(|i| i.id == *id)
                    .cloned()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fernruf_core::types::Rolle;

    fn tabelle() -> (StatischeBenutzer, Identitaet) {
        let anna = Identitaet::neu(UserId::new(), "Anna", Rolle::Berater);
        let tabelle = StatischeBenutzer::neu(vec![
            ("tok-anna".to_string(), anna.clone()),
            (
                "tok-ben".to_string(),
                Identitaet::neu(UserId::new(), "Ben", Rolle::Klient),
            ),
        ]);
        (tabelle, anna)
    }

    #[tokio::test]
    async fn bekanntes_token() {
        let (tabelle, anna) = tabelle();
        assert_eq!(tabelle.pruefen("tok-anna").await, Ok(anna));
    }

    #[tokio::test]
    async fn unbekanntes_token() {
        let (tabelle, _) = tabelle();
        assert_eq!(
            tabelle.pruefen("falsch").await,
            Err(AuthFehler::UngueltigesToken)
        );
    }

    #[tokio::test]
    async fn verzeichnis_ohne_duplikate() {
        let anna = Identitaet::neu(UserId::new(), "Anna", Rolle::Berater);
        // Zwei Tokens fuer dieselbe Identitaet
        let tabelle = StatischeBenutzer::neu(vec![
            ("a".to_string(), anna.clone()),
            ("b".to_string(), anna.clone()),
        ]);
        assert_eq!(tabelle.anzahl(), 1);
        assert_eq!(tabelle.alle_benutzer().await, vec![anna]);
    }
}
