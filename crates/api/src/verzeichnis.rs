//! Benutzerverzeichnis – `GET /users/online`
//!
//! Liefert alle Identitaeten der jeweils anderen Rolle mit ihrem aktuellen
//! Online-Status. Die Liste kommt aus dem externen Verzeichnis, ergaenzt um
//! Identitaeten, die die Presence-Registry seit dem Start gesehen hat.

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use fernruf_core::types::{Identitaet, Rolle, UserId};
use fernruf_signaling::{Benutzerverzeichnis, PresenceRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ApiResult;
use crate::{identitaet_aus_headers, ApiState};

/// Ein Eintrag der Antwortliste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenutzerStatus {
    pub id: UserId,
    pub name: String,
    pub role: Rolle,
    pub online: bool,
}

impl BenutzerStatus {
    fn aus(identitaet: Identitaet, online: bool) -> Self {
        Self {
            id: identitaet.id,
            name: identitaet.name,
            role: identitaet.rolle,
            online,
        }
    }
}

/// Alle Identitaeten der Rolle `rolle` mit Online-Status
pub async fn kandidaten(
    verzeichnis: &dyn Benutzerverzeichnis,
    registry: &PresenceRegistry,
    rolle: Rolle,
) -> Vec<BenutzerStatus> {
    let mut gesehen = HashSet::new();
    let mut liste: Vec<BenutzerStatus> = verzeichnis
        .alle_benutzer()
        .await
        .into_iter()
        .filter(|i| i.rolle == rolle)
        .filter(|i| gesehen.insert(i.id))
        .map(|i| {
            let online = registry.ist_online(&i.id);
            BenutzerStatus::aus(i, online)
        })
        .collect();

    // Registry-Eintraege, die das Verzeichnis nicht kennt
    liste.extend(
        registry
            .list_by_category(rolle)
            .into_iter()
            .filter(|s| gesehen.insert(s.identitaet.id))
            .map(|s| BenutzerStatus::aus(s.identitaet, s.online)),
    );
    liste
}

/// `GET /users/online`
pub async fn online_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let aufrufer = identitaet_aus_headers(&headers, &state).await?;
    let liste = kandidaten(
        state.verzeichnis.as_ref(),
        &state.registry,
        aufrufer.rolle.gegenteil(),
    )
    .await;

    tracing::debug!(
        user_id = %aufrufer.id,
        anzahl = liste.len(),
        "Verzeichnis abgefragt"
    );
    Ok(Json(liste))
}
