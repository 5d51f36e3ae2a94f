//! Medien-Deskriptoren, die der Relay unveraendert transportiert
//!
//! Session-Beschreibungen und ICE-Kandidaten folgen der JSON-Form der
//! Peer-Transport-Schicht (`{type, sdp}` bzw. `{candidate, sdpMid,
//! sdpMLineIndex}`), damit Endpunkte sie ohne Umbau weiterreichen koennen.

use serde::{Deserialize, Deserializer, Serialize};

/// Maximale Groesse einer Session-Beschreibung (SDP) in Bytes
pub const MAX_SDP_BYTES: usize = 64 * 1024;

/// Maximale Laenge einer Kandidaten-Zeile in Bytes
pub const MAX_KANDIDAT_BYTES: usize = 2 * 1024;

/// Art einer Session-Beschreibung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpTyp {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session-Beschreibung (Angebot oder Antwort)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBeschreibung {
    #[serde(rename = "type")]
    pub typ: SdpTyp,
    pub sdp: String,
}

impl SessionBeschreibung {
    pub fn angebot(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn antwort(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickle-ICE-Kandidat
///
/// Ein leerer `candidate`-String markiert das Ende der Kandidatensammlung
/// und ist gueltig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceKandidat {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceKandidat {
    pub fn neu(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }
}

/// Zusatzinformationen zu einem Anruf-Angebot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnrufMetadaten {
    /// Video angefragt (sonst nur Audio)
    #[serde(default)]
    pub video: bool,
    /// Neuaushandlung einer bestehenden Sitzung (ICE-Restart)
    #[serde(default)]
    pub restart: bool,
}

impl AnrufMetadaten {
    pub fn neustart() -> Self {
        Self {
            video: false,
            restart: true,
        }
    }
}

/// Relay-/STUN-Server-Deskriptor wie ihn die Peer-Transport-Schicht erwartet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "eins_oder_viele")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// `urls` darf ein einzelner String oder eine Liste sein
fn eins_oder_viele<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EinsOderViele {
        Eins(String),
        Viele(Vec<String>),
    }

    Ok(match EinsOderViele::deserialize(deserializer)? {
        EinsOderViele::Eins(url) => vec![url],
        EinsOderViele::Viele(urls) => urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_beschreibung_json_form() {
        let angebot = SessionBeschreibung::angebot("v=0");
        let json = serde_json::to_value(&angebot).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }

    #[test]
    fn kandidat_feldnamen_wie_peer_transport() {
        let json = r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let k: IceKandidat = serde_json::from_str(json).unwrap();
        assert_eq!(k.sdp_mid.as_deref(), Some("0"));
        assert_eq!(k.sdp_m_line_index, Some(0));
        assert!(k.username_fragment.is_none());
    }

    #[test]
    fn ice_server_urls_als_string_oder_liste() {
        let einzeln: IceServer = serde_json::from_str(r#"{"urls":"stun:stun.example.org"}"#).unwrap();
        assert_eq!(einzeln.urls, vec!["stun:stun.example.org".to_string()]);

        let liste: IceServer = serde_json::from_str(
            r#"{"urls":["turn:a","turns:b"],"username":"u","credential":"c"}"#,
        )
        .unwrap();
        assert_eq!(liste.urls.len(), 2);
        assert_eq!(liste.credential.as_deref(), Some("c"));
    }

    #[test]
    fn metadaten_standardwerte() {
        let m: AnrufMetadaten = serde_json::from_str("{}").unwrap();
        assert!(!m.video);
        assert!(!m.restart);
        assert!(AnrufMetadaten::neustart().restart);
    }
}
