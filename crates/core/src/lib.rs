//! lobbykey-core – Gemeinsame Typen, Hex-Formate und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Lobbykey-Crates gemeinsam genutzt werden.

pub mod error;
pub mod hexformat;
pub mod message;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Ablehnungsgrund, LobbyError, Result, SignaturFehler};
pub use hexformat::{add_0x, strip_0x, FormatFehler};
pub use message::{zeitstempel_jetzt, LobbyMessage};
pub use types::{PublicKey, SequenceId, SessionId, Signature};
