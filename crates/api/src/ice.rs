//! ICE-Konfiguration – `GET /ice`
//!
//! Die STUN/TURN-Liste kommt von einer `IceQuelle` (statisch aus der
//! Konfiguration oder per HTTP von einem externen Dienst) und wird im
//! `IceCache` fuer eine feste Zeit vorgehalten. Schlaegt eine Auffrischung
//! fehl, wird die zuletzt bekannte Liste weiter ausgeliefert.

use async_trait::async_trait;
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use fernruf_protocol::medien::IceServer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ApiError, ApiResult};
use crate::{identitaet_aus_headers, ApiState};

/// Standard-Lebensdauer eines Cache-Eintrags
pub const STANDARD_CACHE_DAUER: Duration = Duration::from_secs(300);

/// Antwortform von `GET /ice` und vom Upstream-Dienst
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceAntwort {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

/// Liefert die aktuelle Liste der Relay-Server
#[async_trait]
pub trait IceQuelle: Send + Sync + 'static {
    async fn abrufen(&self) -> ApiResult<Vec<IceServer>>;
}

// ---------------------------------------------------------------------------
// Quellen
// ---------------------------------------------------------------------------

/// Feste Liste aus der Konfiguration
#[derive(Debug, Clone, Default)]
pub struct StatischeIceQuelle {
    server: Vec<IceServer>,
}

impl StatischeIceQuelle {
    pub fn neu(server: Vec<IceServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl IceQuelle for StatischeIceQuelle {
    async fn abrufen(&self) -> ApiResult<Vec<IceServer>> {
        Ok(self.server.clone())
    }
}

/// Externer Dienst, der `{"iceServers": [...]}` liefert
#[derive(Debug, Clone)]
pub struct HttpIceQuelle {
    client: reqwest::Client,
    url: String,
}

impl HttpIceQuelle {
    pub fn neu(url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Intern(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IceQuelle for HttpIceQuelle {
    async fn abrufen(&self) -> ApiResult<Vec<IceServer>> {
        let antwort = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ApiError::IceNichtVerfuegbar(e.to_string()))?;

        if !antwort.status().is_success() {
            return Err(ApiError::IceNichtVerfuegbar(format!(
                "Upstream antwortet mit {}",
                antwort.status()
            )));
        }

        let inhalt: IceAntwort = antwort
            .json()
            .await
            .map_err(|e| ApiError::IceNichtVerfuegbar(e.to_string()))?;
        Ok(inhalt.ice_servers)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEintrag {
    abgerufen: Instant,
    server: Vec<IceServer>,
}

/// Haelt das Ergebnis einer `IceQuelle` fuer `dauer` vor
///
/// Clone teilt den Cache. Gleichzeitige Anfragen bei leerem Cache loesen nur
/// einen Upstream-Abruf aus.
#[derive(Clone)]
pub struct IceCache {
    quelle: Arc<dyn IceQuelle>,
    dauer: Duration,
    eintrag: Arc<Mutex<Option<CacheEintrag>>>,
}

impl IceCache {
    pub fn neu(quelle: Arc<dyn IceQuelle>, dauer: Duration) -> Self {
        Self {
            quelle,
            dauer,
            eintrag: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn server(&self) -> ApiResult<Vec<IceServer>> {
        let mut eintrag = self.eintrag.lock().await;

        if let Some(e) = eintrag.as_ref() {
            if e.abgerufen.elapsed() < self.dauer {
                return Ok(e.server.clone());
            }
        }

        match self.quelle.abrufen().await {
            Ok(server) => {
                tracing::debug!(anzahl = server.len(), "ICE-Konfiguration aufgefrischt");
                *eintrag = Some(CacheEintrag {
                    abgerufen: Instant::now(),
                    server: server.clone(),
                });
                Ok(server)
            }
            Err(fehler) => match eintrag.as_ref() {
                Some(alt) => {
                    tracing::warn!(fehler = %fehler, "ICE-Auffrischung fehlgeschlagen, liefere letzte Liste");
                    Ok(alt.server.clone())
                }
                None => Err(fehler),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// `GET /ice`
pub async fn ice_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    identitaet_aus_headers(&headers, &state).await?;
    let ice_servers = state.ice.server().await?;
    Ok(Json(IceAntwort { ice_servers }))
}
