//! fernruf-protocol – Signaling-Protokoll
//!
//! Dieses Crate definiert alle Ereignisse, die zwischen Client und
//! Signaling-Server ausgetauscht werden, die Medien-Deskriptoren, die der
//! Server unveraendert weiterreicht, und das Frame-Format auf dem Draht.

pub mod error;
pub mod medien;
pub mod signal;
pub mod wire;

pub use error::{ProtokollFehler, ProtokollResult};
pub use medien::{AnrufMetadaten, IceKandidat, IceServer, SdpTyp, SessionBeschreibung};
pub use signal::{ClientSignal, ServerSignal, Signal, SignalArt, SignalInhalt, Umwandlung};
pub use wire::{ClientCodec, FrameCodec, ServerCodec};
