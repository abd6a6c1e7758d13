//! Handshake-Payload (Challenge/Response)
//!
//! Der Server erzeugt pro Verbindung eine zufaellige Challenge. Der Client
//! signiert `Domaene ‖ Challenge ‖ beanspruchter PublicKey`. Dadurch ist die
//! Antwort an genau diese Verbindung und genau diesen Schluessel gebunden.

use lobbykey_core::hexformat::{hex_dekodieren, hex_kodieren};
use lobbykey_core::{FormatFehler, PublicKey, Signature, SignaturFehler};
use rand_core::{OsRng, RngCore};

use crate::codec::signatur_pruefen;
use crate::error::{CryptoError, CryptoResult};
use crate::identity::Identity;

/// Domaenen-Trenner fuer Handshake-Signaturen
pub const AUTH_DOMAENE: &[u8] = b"lobbykey/auth/v1\0";

/// Laenge einer Challenge in Bytes
pub const CHALLENGE_LAENGE: usize = 32;

/// Einmalige Handshake-Challenge
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge([u8; CHALLENGE_LAENGE]);

impl Challenge {
    /// Erzeugt eine unvorhersehbare Challenge aus der OS-Zufallsquelle
    pub fn erzeugen() -> CryptoResult<Self> {
        let mut bytes = [0u8; CHALLENGE_LAENGE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Zufall(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; CHALLENGE_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(wert: &str) -> Result<Self, FormatFehler> {
        hex_dekodieren(wert).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex_kodieren(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_LAENGE] {
        &self.0
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Challenge({}…)", &self.to_hex()[..10])
    }
}

/// Baut die kanonischen Handshake-Bytes
pub fn handshake_payload(challenge: &Challenge, public_key: &PublicKey) -> Vec<u8> {
    let mut payload = Vec::with_capacity(AUTH_DOMAENE.len() + CHALLENGE_LAENGE + 32);
    payload.extend_from_slice(AUTH_DOMAENE);
    payload.extend_from_slice(challenge.as_bytes());
    payload.extend_from_slice(public_key.as_bytes());
    payload
}

/// Client-Seite: beantwortet eine Challenge
pub fn challenge_signieren(identity: &Identity, challenge: &Challenge) -> Signature {
    identity.sign(&handshake_payload(challenge, &identity.public_key()))
}

/// Server-Seite: prueft die Antwort auf eine Challenge
pub fn antwort_pruefen(
    challenge: &Challenge,
    public_key: &PublicKey,
    signatur_hex: Option<&str>,
) -> Result<Signature, SignaturFehler> {
    signatur_pruefen(public_key, &handshake_payload(challenge, public_key), signatur_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenges_sind_verschieden() {
        let a = Challenge::erzeugen().unwrap();
        let b = Challenge::erzeugen().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn gueltige_antwort_wird_akzeptiert() {
        let id = Identity::generate();
        let challenge = Challenge::erzeugen().unwrap();
        let sig = challenge_signieren(&id, &challenge);
        assert!(antwort_pruefen(&challenge, &id.public_key(), Some(&sig.to_hex())).is_ok());
    }

    #[test]
    fn antwort_auf_andere_challenge_wird_abgelehnt() {
        let id = Identity::generate();
        let alt = Challenge::from_bytes([1; 32]);
        let neu = Challenge::from_bytes([2; 32]);
        let sig = challenge_signieren(&id, &alt);
        assert_eq!(
            antwort_pruefen(&neu, &id.public_key(), Some(&sig.to_hex())),
            Err(SignaturFehler::KryptografischUngueltig)
        );
    }

    #[test]
    fn fremder_schluessel_wird_abgelehnt() {
        let a = Identity::generate();
        let b = Identity::generate();
        let challenge = Challenge::erzeugen().unwrap();
        let sig = challenge_signieren(&a, &challenge);
        assert!(antwort_pruefen(&challenge, &b.public_key(), Some(&sig.to_hex())).is_err());
    }

    #[test]
    fn challenge_hex_roundtrip() {
        let c = Challenge::from_bytes([0xCD; 32]);
        assert_eq!(Challenge::from_hex(&c.to_hex()).unwrap(), c);
    }
}
