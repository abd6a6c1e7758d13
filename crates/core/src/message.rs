//! Lobby-Nachricht
//!
//! Eine angenommene Nachricht ist nach dem Signieren unveraenderlich. Die
//! `sequence_id` wird ausschliesslich vom Server vergeben.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PublicKey, SequenceId, Signature};

/// Vom Server angenommene und verteilte Lobby-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMessage {
    pub content: String,
    pub sender_public_key: PublicKey,
    pub signature: Signature,
    pub timestamp: DateTime<Utc>,
    pub sequence_id: SequenceId,
}

/// Aktueller Zeitpunkt, auf Millisekunden gekuerzt
///
/// Signiert wird der Zeitstempel in Millisekunden. Damit Client und Server
/// denselben Wert sehen, werden Zeitstempel vor dem Signieren gekuerzt.
pub fn zeitstempel_jetzt() -> DateTime<Utc> {
    zeitstempel_kuerzen(Utc::now())
}

/// Kuerzt einen Zeitstempel auf Millisekunden
pub fn zeitstempel_kuerzen(zeit: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(zeit.timestamp_millis()).unwrap_or(zeit)
}
