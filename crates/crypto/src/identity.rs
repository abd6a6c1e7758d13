//! Langzeit-Identitaetsschluessel (Ed25519)
//!
//! Der private Schluessel verbleibt ausschliesslich im Speicher des Clients.
//! Er wird nie serialisiert und nie geloggt; `Debug` zeigt nur den
//! oeffentlichen Schluessel in Kurzform.

use ed25519_dalek::{Signer, SigningKey};
use lobbykey_core::hexformat::{hex_dekodieren, hex_kodieren};
use lobbykey_core::{PublicKey, Signature};
use rand_core::OsRng;

use crate::error::CryptoResult;

/// Langzeit-Identitaet eines Teilnehmers (Ed25519)
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generiert ein neues Ed25519-Schluessel-Paar
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Erstellt eine Identity aus einem privaten Schluessel (32 Bytes)
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Importiert einen privaten Schluessel im Format `0x` + 64 Hex
    pub fn from_hex(wert: &str) -> CryptoResult<Self> {
        let bytes: [u8; 32] = hex_dekodieren(wert)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Exportiert den privaten Schluessel im Format `0x` + 64 Hex
    pub fn private_key_hex(&self) -> String {
        hex_kodieren(&self.signing_key.to_bytes())
    }

    /// Gibt den oeffentlichen Schluessel zurueck
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Signiert Daten mit dem privaten Schluessel (deterministisch)
    pub fn sign(&self, data: &[u8]) -> Signature {
        Signature::from_bytes(self.signing_key.sign(data).to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity {{ public_key: {} }}", self.public_key().kurz())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::verify;

    #[test]
    fn identity_signieren_und_verifizieren() {
        let identity = Identity::generate();
        let data = b"Hallo, Lobby!";

        let signature = identity.sign(data);
        assert!(verify(
            identity.public_key().as_bytes(),
            data,
            signature.as_bytes()
        ));
    }

    #[test]
    fn signieren_ist_deterministisch() {
        let identity = Identity::from_bytes(&[7u8; 32]);
        assert_eq!(identity.sign(b"abc"), identity.sign(b"abc"));
    }

    #[test]
    fn identity_hex_roundtrip() {
        let identity = Identity::generate();
        let hex = identity.private_key_hex();
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("0x"));

        let restored = Identity::from_hex(&hex).unwrap();
        assert_eq!(restored.public_key(), identity.public_key());
    }

    #[test]
    fn identity_hex_falsche_laenge() {
        assert!(Identity::from_hex("0x1234").is_err());
        assert!(Identity::from_hex(&"11".repeat(32)).is_err());
    }

    #[test]
    fn debug_verraet_keinen_privaten_schluessel() {
        let identity = Identity::from_bytes(&[0x42; 32]);
        let debug = format!("{identity:?}");
        assert!(!debug.contains(&"42".repeat(8)));
        assert!(debug.contains("public_key"));
    }
}
