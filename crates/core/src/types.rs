//! Gemeinsame Identifikationstypen fuer Lobbykey
//!
//! Schluessel und Signaturen verwenden das Newtype-Pattern ueber festen
//! Byte-Arrays. Auf dem Draht werden sie als `0x`-Hex serialisiert.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::hexformat::{hex_dekodieren, hex_kodieren, FormatFehler};

/// Laenge eines Ed25519 Public Keys in Bytes
pub const PUBLIC_KEY_LAENGE: usize = 32;

/// Laenge einer Ed25519-Signatur in Bytes
pub const SIGNATUR_LAENGE: usize = 64;

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Oeffentlicher Schluessel eines Teilnehmers (stabile Identitaet)
///
/// Die Ordnung ist die lexikografische Ordnung der Bytes. Sie bestimmt die
/// Reihenfolge der Online-Liste.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LAENGE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LAENGE] {
        &self.0
    }

    /// Parst `0x` + 64 Hex-Zeichen
    pub fn from_hex(wert: &str) -> Result<Self, FormatFehler> {
        hex_dekodieren(wert).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex_kodieren(&self.0)
    }

    /// Kurzform fuer Logs (`0x` + erste 8 Hex-Zeichen)
    pub fn kurz(&self) -> String {
        let voll = self.to_hex();
        format!("{}…", &voll[..10])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.kurz())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wert = String::deserialize(deserializer)?;
        Self::from_hex(&wert).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Ed25519-Signatur (64 Bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATUR_LAENGE]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATUR_LAENGE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATUR_LAENGE] {
        &self.0
    }

    /// Parst `0x` + 128 Hex-Zeichen
    pub fn from_hex(wert: &str) -> Result<Self, FormatFehler> {
        hex_dekodieren(wert).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex_kodieren(&self.0)
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}…)", &self.to_hex()[..10])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wert = String::deserialize(deserializer)?;
        Self::from_hex(&wert).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Eindeutige Session-ID (eine pro authentifizierter Verbindung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SequenceId
// ---------------------------------------------------------------------------

/// Vom Server vergebene, streng monoton steigende Nachrichtennummer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u64);

impl SequenceId {
    /// Gibt die naechste SequenceId zurueck
    pub fn naechste(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_ordnung_nach_bytes() {
        let a = PublicKey::from_bytes([0x11; 32]);
        let b = PublicKey::from_bytes([0x22; 32]);
        let mut liste = vec![b, a];
        liste.sort();
        assert_eq!(liste, vec![a, b]);
    }

    #[test]
    fn public_key_hex_und_serde() {
        let key = PublicKey::from_bytes([0xAB; 32]);
        assert_eq!(key.to_hex(), format!("0x{}", "ab".repeat(32)));

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(32)));
        let zurueck: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, key);
    }

    #[test]
    fn public_key_serde_lehnt_falsche_laenge_ab() {
        let json = format!("\"0x{}\"", "ab".repeat(31));
        assert!(serde_json::from_str::<PublicKey>(&json).is_err());
    }

    #[test]
    fn public_key_kurzform() {
        let key = PublicKey::from_bytes([0x11; 32]);
        assert_eq!(key.kurz(), "0x11111111…");
    }

    #[test]
    fn signatur_hex() {
        let sig = Signature::from_bytes([0u8; 64]);
        assert_eq!(sig.to_hex().len(), 2 + 128);
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
    }

    #[test]
    fn session_id_eindeutig() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert!(SessionId(Uuid::nil()).to_string().starts_with("session:"));
    }

    #[test]
    fn sequence_id_naechste() {
        assert_eq!(SequenceId(41).naechste(), SequenceId(42));
        assert_eq!(serde_json::to_string(&SequenceId(7)).unwrap(), "7");
    }
}
