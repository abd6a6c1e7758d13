//! Lobby-Protokoll
//!
//! Definiert alle Nachrichten, die zwischen Client und Server ausgetauscht
//! werden.
//!
//! ## Design
//! - Umschlag `{type, data, timestamp}` (JSON, camelCase-Felder)
//! - Geschlossener Summentyp `Payload` mit explizitem `Unknown`-Zweig:
//!   unbekannte Typen werden erkannt statt den Parser scheitern zu lassen
//! - Schluessel und Signaturen in eingehenden Nachrichten bleiben Strings,
//!   damit Formatfehler gezielt gemeldet werden koennen

use chrono::{DateTime, SecondsFormat, Utc};
use lobbykey_core::{Ablehnungsgrund, LobbyMessage, PublicKey, SequenceId, SessionId, Signature};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer `error`-Nachrichten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Nachrichten
    MalformedMessage,
    UnknownMessageType,
    IdentityMismatch,
    InvalidSignature,
    MissingSignature,
    MalformedSignature,
    CryptographicMismatch,
    RateLimited,
    // Handshake / Session
    HandshakeTimeout,
    HandshakeRejected,
    NotAuthenticated,
    AlreadyOnline,
    Superseded,
    // Server
    ServerFull,
    ServerRestart,
    InternalError,
}

impl From<Ablehnungsgrund> for ErrorCode {
    fn from(grund: Ablehnungsgrund) -> Self {
        match grund {
            Ablehnungsgrund::MalformedMessage => Self::MalformedMessage,
            Ablehnungsgrund::IdentityMismatch => Self::IdentityMismatch,
            Ablehnungsgrund::MissingSignature => Self::MissingSignature,
            Ablehnungsgrund::MalformedSignature => Self::MalformedSignature,
            Ablehnungsgrund::CryptographicMismatch => Self::CryptographicMismatch,
            Ablehnungsgrund::RateLimited => Self::RateLimited,
        }
    }
}

// ---------------------------------------------------------------------------
// Zeitstempel
// ---------------------------------------------------------------------------

/// Formatiert einen Zeitstempel als RFC 3339 mit Millisekunden
pub fn zeitstempel_formatieren(zeit: &DateTime<Utc>) -> String {
    zeit.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parst einen RFC-3339-Zeitstempel
pub fn zeitstempel_parsen(wert: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(wert)
        .ok()
        .map(|z| z.with_timezone(&Utc))
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Challenge vom Server (erste Nachricht jeder Verbindung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    /// 32 Bytes, `0x`-Hex
    pub challenge: String,
    pub server_name: String,
    pub timeout_ms: u64,
}

/// Antwort des Clients auf die Challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub public_key: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub profile_name: Option<String>,
}

/// Ergebnis des Handshakes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub public_key: Option<PublicKey>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub error: Option<String>,
    /// Maschinenlesbarer Grund einer Ablehnung
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub online_users: Vec<PresenceUser>,
    #[serde(default)]
    pub online_count: usize,
}

// ---------------------------------------------------------------------------
// Lobby-Nachrichten
// ---------------------------------------------------------------------------

/// Lobby-Nachricht auf dem Draht (in beide Richtungen)
///
/// Vom Client gesendet fehlt `sequenceId`. Vom Server verteilt sind alle
/// Felder gesetzt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMessageData {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub sender_public_key: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<SequenceId>,
}

impl LobbyMessageData {
    /// Baut die Draht-Darstellung einer signierten Nachricht (Client -> Server)
    pub fn signiert(
        content: impl Into<String>,
        sender: &PublicKey,
        signature: &Signature,
        timestamp: &DateTime<Utc>,
    ) -> Self {
        Self {
            content: Some(content.into()),
            sender_public_key: Some(sender.to_hex()),
            signature: Some(signature.to_hex()),
            timestamp: Some(zeitstempel_formatieren(timestamp)),
            sequence_id: None,
        }
    }

    /// Draht-Darstellung einer angenommenen Nachricht (Server -> alle)
    pub fn aus_nachricht(nachricht: &LobbyMessage) -> Self {
        Self {
            content: Some(nachricht.content.clone()),
            sender_public_key: Some(nachricht.sender_public_key.to_hex()),
            signature: Some(nachricht.signature.to_hex()),
            timestamp: Some(zeitstempel_formatieren(&nachricht.timestamp)),
            sequence_id: Some(nachricht.sequence_id),
        }
    }
}

/// Ergebnis der Pruefung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verifikation {
    Accepted,
    Rejected,
}

/// Rueckmeldung an den Absender einer Lobby-Nachricht
///
/// Die Signatur dient dem Client als Schluessel, um den Eintrag in seiner
/// Offline-Queue zuzuordnen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    pub status: Verifikation,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub sequence_id: Option<SequenceId>,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub error_kind: Option<Ablehnungsgrund>,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl VerificationStatus {
    pub fn angenommen(signature: Option<String>, sequence_id: SequenceId, duplicate: bool) -> Self {
        Self {
            status: Verifikation::Accepted,
            signature,
            sequence_id: Some(sequence_id),
            duplicate,
            error_kind: None,
            retry_after_ms: None,
            reason: None,
        }
    }

    pub fn abgelehnt(
        signature: Option<String>,
        grund: Ablehnungsgrund,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: Verifikation::Rejected,
            signature,
            sequence_id: None,
            duplicate: false,
            error_kind: Some(grund),
            retry_after_ms: None,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Eintrag der Online-Liste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub public_key: PublicKey,
    #[serde(default)]
    pub profile_name: Option<String>,
}

/// `user_joined` / `user_left`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub public_key: PublicKey,
    #[serde(default)]
    pub profile_name: Option<String>,
    pub online_count: usize,
}

/// Vollstaendige Online-Liste, aufsteigend nach PublicKey-Bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub users: Vec<PresenceUser>,
    pub online_count: usize,
}

/// Anfrage nach der aktuellen Online-Liste
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRequest {}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Ping (Client -> Server oder Server -> Client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub echo_timestamp_ms: u64,
}

/// Sauberes Abmelden
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Logout {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Server wird neu gestartet oder heruntergefahren
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRestart {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Alle Nachrichtentypen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    AuthChallenge(AuthChallenge),
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    LobbyMessage(LobbyMessageData),
    VerificationStatus(VerificationStatus),
    UserJoined(PresenceUpdate),
    UserLeft(PresenceUpdate),
    PresenceRequest(PresenceRequest),
    PresenceSnapshot(PresenceSnapshot),
    Ping(Ping),
    Pong(Pong),
    Logout(Logout),
    ServerRestart(ServerRestart),
    Error(ErrorResponse),
    /// Unbekannter `type` (Original-Bezeichner)
    Unknown(String),
}

impl Payload {
    /// Wert des `type`-Felds
    pub fn typ(&self) -> &str {
        match self {
            Self::AuthChallenge(_) => "auth_challenge",
            Self::AuthRequest(_) => "auth_request",
            Self::AuthResponse(_) => "auth_response",
            Self::LobbyMessage(_) => "lobby_message",
            Self::VerificationStatus(_) => "verification_status",
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::PresenceRequest(_) => "presence_request",
            Self::PresenceSnapshot(_) => "presence_snapshot",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Logout(_) => "logout",
            Self::ServerRestart(_) => "server_restart",
            Self::Error(_) => "error",
            Self::Unknown(typ) => typ,
        }
    }

    fn daten(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::AuthChallenge(d) => serde_json::to_value(d),
            Self::AuthRequest(d) => serde_json::to_value(d),
            Self::AuthResponse(d) => serde_json::to_value(d),
            Self::LobbyMessage(d) => serde_json::to_value(d),
            Self::VerificationStatus(d) => serde_json::to_value(d),
            Self::UserJoined(d) | Self::UserLeft(d) => serde_json::to_value(d),
            Self::PresenceRequest(d) => serde_json::to_value(d),
            Self::PresenceSnapshot(d) => serde_json::to_value(d),
            Self::Ping(d) => serde_json::to_value(d),
            Self::Pong(d) => serde_json::to_value(d),
            Self::Logout(d) => serde_json::to_value(d),
            Self::ServerRestart(d) => serde_json::to_value(d),
            Self::Error(d) => serde_json::to_value(d),
            Self::Unknown(_) => Ok(serde_json::Value::Null),
        }
    }

    fn aus_roh(typ: String, daten: serde_json::Value) -> serde_json::Result<Self> {
        // Fehlendes `data` wird wie ein leeres Objekt behandelt
        let daten = if daten.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            daten
        };

        Ok(match typ.as_str() {
            "auth_challenge" => Self::AuthChallenge(serde_json::from_value(daten)?),
            "auth_request" => Self::AuthRequest(serde_json::from_value(daten)?),
            "auth_response" => Self::AuthResponse(serde_json::from_value(daten)?),
            "lobby_message" => Self::LobbyMessage(serde_json::from_value(daten)?),
            "verification_status" => Self::VerificationStatus(serde_json::from_value(daten)?),
            "user_joined" => Self::UserJoined(serde_json::from_value(daten)?),
            "user_left" => Self::UserLeft(serde_json::from_value(daten)?),
            "presence_request" => Self::PresenceRequest(serde_json::from_value(daten)?),
            "presence_snapshot" => Self::PresenceSnapshot(serde_json::from_value(daten)?),
            "ping" => Self::Ping(serde_json::from_value(daten)?),
            "pong" => Self::Pong(serde_json::from_value(daten)?),
            "logout" => Self::Logout(serde_json::from_value(daten)?),
            "server_restart" => Self::ServerRestart(serde_json::from_value(daten)?),
            "error" => Self::Error(serde_json::from_value(daten)?),
            _ => Self::Unknown(typ),
        })
    }
}

// ---------------------------------------------------------------------------
// WireMessage (Umschlag)
// ---------------------------------------------------------------------------

/// Umschlag fuer alle Nachrichten: `{type, data, timestamp}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RohUmschlag {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: Option<String>,
}

impl Serialize for WireMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.payload.daten().map_err(serde::ser::Error::custom)?;
        RohUmschlag {
            typ: self.payload.typ().to_string(),
            data,
            timestamp: Some(zeitstempel_formatieren(&self.timestamp)),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WireMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let roh = RohUmschlag::deserialize(deserializer)?;
        let timestamp = match roh.timestamp.as_deref() {
            Some(wert) => zeitstempel_parsen(wert)
                .ok_or_else(|| de::Error::custom("ungueltiger Zeitstempel"))?,
            None => Utc::now(),
        };
        let payload = Payload::aus_roh(roh.typ, roh.data).map_err(de::Error::custom)?;
        Ok(Self { payload, timestamp })
    }
}

impl WireMessage {
    /// Erstellt eine neue Nachricht mit aktuellem Zeitstempel
    pub fn neu(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(timestamp_ms: u64) -> Self {
        Self::neu(Payload::Ping(Ping { timestamp_ms }))
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(echo_timestamp_ms: u64) -> Self {
        Self::neu(Payload::Pong(Pong { echo_timestamp_ms }))
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::neu(Payload::Error(ErrorResponse {
            code,
            message: message.into(),
        }))
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Millisekunden seit Unix-Epoche
pub fn jetzt_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serialisierung() {
        let ping = WireMessage::ping(1234567890);
        let json = ping.to_json().unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"timestampMs\":1234567890"));

        let decoded = WireMessage::from_json(&json).unwrap();
        assert_eq!(decoded.payload, Payload::Ping(Ping { timestamp_ms: 1234567890 }));
    }

    #[test]
    fn error_response_serialisierung() {
        let msg = WireMessage::error(ErrorCode::NotAuthenticated, "Nicht angemeldet");
        let wert: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(wert["type"], "error");
        assert_eq!(wert["data"]["code"], "NOT_AUTHENTICATED");
        assert_eq!(wert["data"]["message"], "Nicht angemeldet");
    }

    #[test]
    fn auth_request_vom_client() {
        let json = format!(
            r#"{{"type":"auth_request","data":{{"publicKey":"0x{}","signature":"0x{}"}},"timestamp":"2024-05-01T12:00:00.000Z"}}"#,
            "11".repeat(32),
            "aa".repeat(64)
        );
        let msg = WireMessage::from_json(&json).unwrap();
        match msg.payload {
            Payload::AuthRequest(req) => {
                assert_eq!(req.public_key, format!("0x{}", "11".repeat(32)));
                assert!(req.signature.is_some());
                assert!(req.profile_name.is_none());
            }
            andere => panic!("Erwartet AuthRequest, erhalten {andere:?}"),
        }
    }

    #[test]
    fn lobby_message_ohne_pflichtfelder_ist_parsebar() {
        // Fehlende Felder werden erst bei der Validierung abgelehnt
        let json = r#"{"type":"lobby_message","data":{"content":"Hallo"}}"#;
        let msg = WireMessage::from_json(json).unwrap();
        match msg.payload {
            Payload::LobbyMessage(d) => {
                assert_eq!(d.content.as_deref(), Some("Hallo"));
                assert!(d.signature.is_none());
                assert!(d.sender_public_key.is_none());
            }
            andere => panic!("Erwartet LobbyMessage, erhalten {andere:?}"),
        }
    }

    #[test]
    fn unbekannter_typ_wird_erkannt() {
        let json = r#"{"type":"channel_join","data":{"channel":"x"}}"#;
        let msg = WireMessage::from_json(json).unwrap();
        assert_eq!(msg.payload, Payload::Unknown("channel_join".into()));
        assert_eq!(msg.payload.typ(), "channel_join");
    }

    #[test]
    fn fehlendes_data_fuer_leere_nachrichten() {
        let msg = WireMessage::from_json(r#"{"type":"presence_request"}"#).unwrap();
        assert_eq!(msg.payload, Payload::PresenceRequest(PresenceRequest {}));

        let msg = WireMessage::from_json(r#"{"type":"logout"}"#).unwrap();
        assert_eq!(msg.payload, Payload::Logout(Logout::default()));
    }

    #[test]
    fn ungueltiger_zeitstempel_wird_abgelehnt() {
        let json = r#"{"type":"ping","data":{"timestampMs":1},"timestamp":"gestern"}"#;
        assert!(WireMessage::from_json(json).is_err());
    }

    #[test]
    fn user_joined_format() {
        let msg = WireMessage::neu(Payload::UserJoined(PresenceUpdate {
            public_key: PublicKey::from_bytes([0x22; 32]),
            profile_name: Some("Bob".into()),
            online_count: 2,
        }));
        let wert: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(wert["type"], "user_joined");
        assert_eq!(wert["data"]["publicKey"], format!("0x{}", "22".repeat(32)));
        assert_eq!(wert["data"]["profileName"], "Bob");
        assert_eq!(wert["data"]["onlineCount"], 2);
        assert!(wert["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn verification_status_abgelehnt() {
        let status = VerificationStatus::abgelehnt(
            Some("0xab".into()),
            Ablehnungsgrund::CryptographicMismatch,
            "Signatur ungueltig",
        );
        let msg = WireMessage::neu(Payload::VerificationStatus(status.clone()));
        let wert: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(wert["data"]["status"], "rejected");
        assert_eq!(wert["data"]["errorKind"], "CRYPTOGRAPHIC_MISMATCH");

        let zurueck = WireMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(zurueck.payload, Payload::VerificationStatus(status));
    }

    #[test]
    fn lobby_message_aus_nachricht() {
        let nachricht = LobbyMessage {
            content: "Hallo".into(),
            sender_public_key: PublicKey::from_bytes([0x11; 32]),
            signature: Signature::from_bytes([0x33; 64]),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
            sequence_id: SequenceId(9),
        };
        let daten = LobbyMessageData::aus_nachricht(&nachricht);
        assert_eq!(daten.timestamp.as_deref(), Some("2023-11-14T22:13:20.123Z"));
        assert_eq!(daten.sequence_id, Some(SequenceId(9)));
        assert_eq!(
            zeitstempel_parsen(daten.timestamp.as_deref().unwrap()),
            Some(nachricht.timestamp)
        );
    }

    #[test]
    fn error_code_aus_ablehnungsgrund() {
        assert_eq!(
            ErrorCode::from(Ablehnungsgrund::RateLimited),
            ErrorCode::RateLimited
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::UnknownMessageType).unwrap(),
            "\"UNKNOWN_MESSAGE_TYPE\""
        );
    }
}
