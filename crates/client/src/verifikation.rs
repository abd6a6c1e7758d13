//! Lokale Pruefung empfangener Lobby-Nachrichten
//!
//! Der Client vertraut dem Server nicht blind: jede verteilte Nachricht wird
//! gegen den Absender-Schluessel geprueft, bevor sie als verifiziert gilt.

use lobbykey_core::{Ablehnungsgrund, LobbyMessage, PublicKey};
use lobbykey_protocol::message::{zeitstempel_parsen, LobbyMessageData};

/// Prueft eine vom Server verteilte Nachricht
pub fn nachricht_pruefen(daten: &LobbyMessageData) -> Result<LobbyMessage, Ablehnungsgrund> {
    let content = daten
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(Ablehnungsgrund::MalformedMessage)?;
    let sender = daten
        .sender_public_key
        .as_deref()
        .and_then(|hex| PublicKey::from_hex(hex).ok())
        .ok_or(Ablehnungsgrund::MalformedMessage)?;
    let timestamp = daten
        .timestamp
        .as_deref()
        .and_then(zeitstempel_parsen)
        .ok_or(Ablehnungsgrund::MalformedMessage)?;
    let sequence_id = daten.sequence_id.ok_or(Ablehnungsgrund::MalformedMessage)?;

    let payload = lobbykey_crypto::nachricht_payload(content, &sender, timestamp);
    let signature = lobbykey_crypto::signatur_pruefen(&sender, &payload, daten.signature.as_deref())?;

    Ok(LobbyMessage {
        content: content.to_string(),
        sender_public_key: sender,
        signature,
        timestamp,
        sequence_id,
    })
}
