//! Fehlertypen der HTTP-Schnittstellen

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Alle Fehler, die ein HTTP-Handler melden kann
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authorization-Header fehlt")]
    HeaderFehlt,

    #[error("Ungueltiger oder abgelaufener Token")]
    UngueltigesToken,

    #[error("Identitaetsdienst nicht erreichbar: {0}")]
    DienstNichtErreichbar(String),

    #[error("ICE-Konfiguration nicht verfuegbar: {0}")]
    IceNichtVerfuegbar(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::HeaderFehlt | Self::UngueltigesToken => StatusCode::UNAUTHORIZED,
            Self::DienstNichtErreichbar(_) | Self::IceNichtVerfuegbar(_) => StatusCode::BAD_GATEWAY,
            Self::Intern(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            tracing::warn!(fehler = %self, "HTTP-Anfrage fehlgeschlagen");
        }
        (
            status,
            Json(json!({ "error": { "code": status.as_u16(), "message": self.to_string() } })),
        )
            .into_response()
    }
}
