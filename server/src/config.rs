//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use fernruf_core::types::{Identitaet, Rolle, UserId};
use fernruf_core::FernrufError;
use fernruf_observability::logging::{log_format_gueltig, log_level_gueltig};
use fernruf_protocol::medien::IceServer;
use fernruf_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Signaling (Keepalive, Rate-Limit, Queues)
    pub signaling: SignalingEinstellungen,
    /// STUN/TURN-Konfiguration fuer `GET /ice`
    pub ice: IceEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Statische Token-Tabelle (Entwicklung)
    pub benutzer: Vec<BenutzerEintrag>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Signaling-Verbindungen
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Fernruf".into(),
            max_verbindungen: 1024,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer das TCP-Signaling
    pub tcp_port: u16,
    /// Port fuer Verzeichnis, ICE, Health und Metriken
    pub http_port: u16,
    /// CORS-Origins fuer HTTP (leer = alle erlaubt)
    pub cors_origins: Vec<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9987,
            http_port: 8080,
            cors_origins: vec![],
        }
    }
}

/// Signaling-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    pub keepalive_sek: u64,
    /// Verbindungen ohne Lebenszeichen werden danach getrennt
    pub verbindungs_timeout_sek: u64,
    pub handshake_timeout_sek: u64,
    /// Weitergeleitete Signale pro Minute und Identitaet (0 = unbegrenzt)
    pub signale_pro_minute: u32,
    pub send_queue_groesse: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        let standard = SignalingConfig::default();
        Self {
            keepalive_sek: standard.keepalive_sek,
            verbindungs_timeout_sek: standard.verbindungs_timeout_sek,
            handshake_timeout_sek: standard.handshake_timeout_sek,
            signale_pro_minute: standard.signale_pro_minute,
            send_queue_groesse: standard.send_queue_groesse,
        }
    }
}

/// ICE-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceEinstellungen {
    /// Lebensdauer der gecachten Liste
    pub cache_sek: u64,
    /// Externer Dienst mit `{"iceServers": [...]}` (ersetzt `server`)
    pub upstream_url: Option<String>,
    pub upstream_timeout_sek: u64,
    /// Feste Liste, wenn kein Upstream konfiguriert ist
    pub server: Vec<IceServer>,
}

impl Default for IceEinstellungen {
    fn default() -> Self {
        Self {
            cache_sek: 300,
            upstream_url: None,
            upstream_timeout_sek: 5,
            server: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".into()],
                username: None,
                credential: None,
            }],
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Ein Eintrag der statischen Token-Tabelle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerEintrag {
    pub token: String,
    pub id: UserId,
    pub name: String,
    pub rolle: Rolle,
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> fernruf_core::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt).map_err(|e| {
                FernrufError::Konfiguration(format!("Fehler in '{pfad}': {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.pruefen()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn pruefen(&self) -> fernruf_core::Result<()> {
        if !log_level_gueltig(&self.logging.level) {
            return Err(FernrufError::Konfiguration(format!(
                "Unbekanntes Log-Level '{}'",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(FernrufError::Konfiguration(format!(
                "Unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }
        if self.server.max_verbindungen == 0 {
            return Err(FernrufError::Konfiguration(
                "server.max_verbindungen muss groesser als 0 sein".into(),
            ));
        }
        self.tcp_bind_adresse()?;
        self.http_bind_adresse()?;
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer das TCP-Signaling zurueck
    pub fn tcp_bind_adresse(&self) -> fernruf_core::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port);
        adresse
            .parse()
            .map_err(|e| FernrufError::Konfiguration(format!("Ungueltige TCP-Adresse '{adresse}': {e}")))
    }

    /// Gibt die Bind-Adresse fuer den HTTP-Server zurueck
    pub fn http_bind_adresse(&self) -> fernruf_core::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.http_port);
        adresse
            .parse()
            .map_err(|e| FernrufError::Konfiguration(format!("Ungueltige HTTP-Adresse '{adresse}': {e}")))
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_verbindungen: self.server.max_verbindungen,
            keepalive_sek: self.signaling.keepalive_sek,
            verbindungs_timeout_sek: self.signaling.verbindungs_timeout_sek,
            handshake_timeout_sek: self.signaling.handshake_timeout_sek,
            signale_pro_minute: self.signaling.signale_pro_minute,
            send_queue_groesse: self.signaling.send_queue_groesse,
            ..SignalingConfig::default()
        }
    }

    pub fn ice_cache_dauer(&self) -> Duration {
        Duration::from_secs(self.ice.cache_sek)
    }

    /// Token-Tabelle fuer `StatischeBenutzer`
    pub fn benutzer_tabelle(&self) -> Vec<(String, Identitaet)> {
        self.benutzer
            .iter()
            .map(|b| {
                (
                    b.token.clone(),
                    Identitaet::neu(b.id, b.name.clone(), b.rolle),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.server.max_verbindungen, 1024);
        assert_eq!(cfg.netzwerk.tcp_port, 9987);
        assert_eq!(cfg.ice.cache_sek, 300);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.benutzer.is_empty());
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse().unwrap().to_string(), "0.0.0.0:9987");
        assert_eq!(cfg.http_bind_adresse().unwrap().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Praxis Nord"
            max_verbindungen = 100

            [netzwerk]
            tcp_port = 10000

            [signaling]
            signale_pro_minute = 120

            [ice]
            upstream_url = "https://turn.example.org/credentials"

            [[ice.server]]
            urls = "stun:stun.example.org"

            [[benutzer]]
            token = "tok-anna"
            id = "6f1c1f3e-8d0b-4e57-9a55-3f3c2d1b0a99"
            name = "Anna"
            rolle = "berater"
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Praxis Nord");
        assert_eq!(cfg.netzwerk.tcp_port, 10000);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.http_port, 8080);
        assert_eq!(cfg.signaling.keepalive_sek, 30);

        let signaling = cfg.signaling_config();
        assert_eq!(signaling.max_verbindungen, 100);
        assert_eq!(signaling.signale_pro_minute, 120);

        assert_eq!(cfg.ice.server[0].urls, vec!["stun:stun.example.org".to_string()]);
        assert!(cfg.ice.upstream_url.is_some());

        let tabelle = cfg.benutzer_tabelle();
        assert_eq!(tabelle.len(), 1);
        assert_eq!(tabelle[0].0, "tok-anna");
        assert_eq!(tabelle[0].1.rolle, Rolle::Berater);
    }

    #[test]
    fn ungueltiges_log_level() {
        let mut cfg = ServerConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(matches!(cfg.pruefen(), Err(FernrufError::Konfiguration(_))));
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let cfg = ServerConfig::laden("/gibt/es/nicht/config.toml").unwrap();
        assert_eq!(cfg.netzwerk.tcp_port, 9987);
    }

    #[test]
    fn unlesbare_datei_ist_io_fehler() {
        // Ein Verzeichnis laesst sich nicht als Datei lesen
        let pfad = std::env::temp_dir();
        let ergebnis = ServerConfig::laden(&pfad.to_string_lossy());
        assert!(matches!(ergebnis, Err(FernrufError::Io(_))));
    }

    #[test]
    fn kaputtes_toml_ist_konfigurationsfehler() {
        let pfad = std::env::temp_dir().join(format!("fernruf-test-{}.toml", std::process::id()));
        std::fs::write(&pfad, "[netzwerk]\ntcp_port = \"kein port\"\n").unwrap();
        let ergebnis = ServerConfig::laden(&pfad.to_string_lossy());
        let _ = std::fs::remove_file(&pfad);
        assert!(matches!(ergebnis, Err(FernrufError::Konfiguration(_))));
    }

    #[test]
    fn ungueltige_bind_adresse() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = "nirgendwo".into();
        assert!(cfg.tcp_bind_adresse().is_err());
    }
}
