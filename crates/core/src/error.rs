//! Fehlertypen fuer Fernruf
//!
//! Zentraler Fehler-Enum fuer Zustaende, die crate-uebergreifend auftreten.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Fernruf
pub type Result<T> = std::result::Result<T, FernrufError>;

/// Crate-uebergreifende Fehler
#[derive(Debug, Error)]
pub enum FernrufError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Dateisystem ---
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = FernrufError::Konfiguration("Port fehlt".into());
        assert_eq!(e.to_string(), "Konfigurationsfehler: Port fehlt");
    }

    #[test]
    fn io_fehler_wird_konvertiert() {
        fn lesen() -> Result<String> {
            Ok(std::fs::read_to_string("/gibt/es/nicht")?)
        }
        assert!(matches!(lesen(), Err(FernrufError::Io(_))));
    }
}
