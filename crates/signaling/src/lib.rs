//! fernruf-signaling – Presence und Signaling-Relay
//!
//! Dieser Crate implementiert den Signaling-Service von Fernruf. Er
//! verwaltet TCP-Verbindungen, bindet authentifizierte Identitaeten an ihre
//! Verbindung und leitet Anruf-Signale zwischen zwei Identitaeten weiter.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  authenticate -> Authentifizierer -> PresenceRegistry::bind
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- SignalingRelay (call-user, answer-call, ice-candidate, end-call)
//!     +-- presence:refresh, ping/pong
//!
//! PresenceRegistry   – Identitaet <-> Verbindung, Presence-Events
//! EventBroadcaster   – Send-Queue pro Verbindung, online-status an alle
//! SignalRateLimiter  – Token-Bucket pro Identitaet
//! ```

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod rate_limit;
pub mod relay;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use auth::{AuthFehler, Authentifizierer, Benutzerverzeichnis, StatischeBenutzer};
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use presence::{PresenceEvent, PresenceRegistry, PresenceStatus};
pub use relay::{RelayErgebnis, SignalingRelay, VerwerfGrund};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
