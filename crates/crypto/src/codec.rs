//! Signatur-Codec fuer Lobby-Nachrichten
//!
//! Kanonische Byte-Kodierung einer Nachricht, Signieren und Verifizieren.
//! Keine I/O, kein geteilter Zustand.
//!
//! ## Kanonisches Format
//!
//! ```text
//! +---------------------------+-----------+--------------+-------------+---------+
//! | "lobbykey/lobby-message/  | Absender  | Zeitstempel  | Inhalt-     | Inhalt  |
//! |  v1\0"                    | 32 Bytes  | i64 BE (ms)  | Laenge u32  | UTF-8   |
//! +---------------------------+-----------+--------------+-------------+---------+
//! ```
//!
//! Absender und Zeitstempel sind Teil der signierten Bytes. Eine Signatur
//! laesst sich daher weder auf anderen Inhalt noch auf einen anderen
//! Absender uebertragen.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use lobbykey_core::{PublicKey, Signature, SignaturFehler};

use crate::identity::Identity;

/// Domaenen-Trenner fuer Lobby-Nachrichten
pub const NACHRICHT_DOMAENE: &[u8] = b"lobbykey/lobby-message/v1\0";

// ---------------------------------------------------------------------------
// Kanonische Kodierung
// ---------------------------------------------------------------------------

/// Baut die kanonischen Bytes einer Lobby-Nachricht
pub fn nachricht_payload(content: &str, sender: &PublicKey, timestamp: DateTime<Utc>) -> Vec<u8> {
    let inhalt = content.as_bytes();
    let mut payload = Vec::with_capacity(NACHRICHT_DOMAENE.len() + 32 + 8 + 4 + inhalt.len());
    payload.extend_from_slice(NACHRICHT_DOMAENE);
    payload.extend_from_slice(sender.as_bytes());
    payload.extend_from_slice(&timestamp.timestamp_millis().to_be_bytes());
    payload.extend_from_slice(&(inhalt.len() as u32).to_be_bytes());
    payload.extend_from_slice(inhalt);
    payload
}

// ---------------------------------------------------------------------------
// Signieren / Verifizieren
// ---------------------------------------------------------------------------

/// Signiert beliebige Payload-Bytes
pub fn sign(identity: &Identity, payload: &[u8]) -> Signature {
    identity.sign(payload)
}

/// Verifiziert rohe Bytes
///
/// Gibt `false` zurueck bei falscher Schluessel- oder Signaturlaenge, bei
/// ungueltigem Schluessel und bei jeder Abweichung im Payload.
pub fn verify(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let signature = DalekSignature::from_bytes(&sig_bytes);
    verifying_key.verify_strict(payload, &signature).is_ok()
}

/// Signiert eine Lobby-Nachricht
pub fn nachricht_signieren(identity: &Identity, content: &str, timestamp: DateTime<Utc>) -> Signature {
    let payload = nachricht_payload(content, &identity.public_key(), timestamp);
    identity.sign(&payload)
}

/// Verifiziert eine Lobby-Nachricht gegen Inhalt, Absender und Zeitstempel
pub fn nachricht_verifizieren(
    sender: &PublicKey,
    content: &str,
    timestamp: DateTime<Utc>,
    signature: &Signature,
) -> bool {
    let payload = nachricht_payload(content, sender, timestamp);
    verify(sender.as_bytes(), &payload, signature.as_bytes())
}

/// Prueft eine Signatur in Draht-Darstellung und unterscheidet die Fehlerfaelle
///
/// Das Format wird vor der kryptografischen Pruefung validiert.
pub fn signatur_pruefen(
    sender: &PublicKey,
    payload: &[u8],
    signatur_hex: Option<&str>,
) -> Result<Signature, SignaturFehler> {
    let roh = match signatur_hex {
        Some(s) if !s.is_empty() => s,
        _ => return Err(SignaturFehler::Fehlend),
    };
    let signatur = Signature::from_hex(roh).map_err(|_| SignaturFehler::Fehlerhaft)?;
    if verify(sender.as_bytes(), payload, signatur.as_bytes()) {
        Ok(signatur)
    } else {
        Err(SignaturFehler::KryptografischUngueltig)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
