//! # lobbykey-crypto
//!
//! Ed25519-Identitaeten und Signaturen fuer Lobbykey.
//!
//! ## Module
//! - `identity` - Ed25519 Langzeit-Identitaetsschluessel
//! - `codec` - Kanonische Nachrichten-Payloads, Signieren, Verifizieren
//! - `handshake` - Challenge und Handshake-Payload
//! - `error` - Fehlertypen

pub mod codec;
pub mod error;
pub mod handshake;
pub mod identity;

// Bequeme Re-Exports
pub use codec::{
    nachricht_payload, nachricht_signieren, nachricht_verifizieren, sign, signatur_pruefen,
    verify,
};
pub use error::{CryptoError, CryptoResult};
pub use handshake::{antwort_pruefen, challenge_signieren, handshake_payload, Challenge};
pub use identity::Identity;
