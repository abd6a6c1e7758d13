//! Fehlertypen fuer Lobbykey
//!
//! `LobbyError` deckt alle Fehlerzustaende ab, die zwischen den Crates
//! weitergereicht werden. `Ablehnungsgrund` ist die feste Taxonomie, mit der
//! eine einzelne Lobby-Nachricht abgelehnt wird (auch auf dem Draht).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Globaler Result-Alias fuer Lobbykey
pub type Result<T> = std::result::Result<T, LobbyError>;

// ---------------------------------------------------------------------------
// Signatur-Fehler
// ---------------------------------------------------------------------------

/// Unterfaelle einer ungueltigen Signatur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SignaturFehler {
    #[error("Signatur fehlt")]
    Fehlend,

    #[error("Signatur hat ein ungueltiges Format")]
    Fehlerhaft,

    #[error("Signatur passt nicht zu Inhalt und Absender")]
    KryptografischUngueltig,
}

// ---------------------------------------------------------------------------
// Ablehnungsgrund
// ---------------------------------------------------------------------------

/// Grund, aus dem eine Lobby-Nachricht abgelehnt wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Ablehnungsgrund {
    MalformedMessage,
    IdentityMismatch,
    MissingSignature,
    MalformedSignature,
    CryptographicMismatch,
    RateLimited,
}

impl Ablehnungsgrund {
    /// Stabiler Bezeichner fuer Logs und Metrik-Labels
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::IdentityMismatch => "identity_mismatch",
            Self::MissingSignature => "missing_signature",
            Self::MalformedSignature => "malformed_signature",
            Self::CryptographicMismatch => "cryptographic_mismatch",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl From<SignaturFehler> for Ablehnungsgrund {
    fn from(fehler: SignaturFehler) -> Self {
        match fehler {
            SignaturFehler::Fehlend => Self::MissingSignature,
            SignaturFehler::Fehlerhaft => Self::MalformedSignature,
            SignaturFehler::KryptografischUngueltig => Self::CryptographicMismatch,
        }
    }
}

impl std::fmt::Display for Ablehnungsgrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

// ---------------------------------------------------------------------------
// LobbyError
// ---------------------------------------------------------------------------

/// Alle moeglichen Fehler im Lobbykey-System
#[derive(Debug, Error)]
pub enum LobbyError {
    // --- Nachrichten ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Ungueltige Signatur: {0}")]
    UngueltigeSignatur(#[from] SignaturFehler),

    #[error("Absender stimmt nicht mit der Session-Identitaet ueberein")]
    IdentitaetAbweichend,

    #[error("Rate-Limit erreicht, erneut versuchen in {retry_after_ms} ms")]
    RateLimitiert { retry_after_ms: u64 },

    // --- Handshake ---
    #[error("Handshake-Zeitlimit ueberschritten")]
    HandshakeZeitlimit,

    #[error("Handshake abgelehnt: {0}")]
    HandshakeAbgelehnt(String),

    // --- Verbindung ---
    #[error("Transportfehler: {0}")]
    Transport(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl LobbyError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimitiert { .. })
    }

    /// Nur Transport- und Rate-Limit-Fehler werden dem Benutzer angezeigt,
    /// alles andere wird an der Stelle aufgeloest, an der es auftritt.
    pub fn fuer_benutzer_relevant(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimitiert { .. })
    }

    /// Ablehnungsgrund fuer nachrichtenbezogene Fehler
    pub fn ablehnungsgrund(&self) -> Option<Ablehnungsgrund> {
        match self {
            Self::UngueltigeNachricht(_) => Some(Ablehnungsgrund::MalformedMessage),
            Self::UngueltigeSignatur(s) => Some((*s).into()),
            Self::IdentitaetAbweichend => Some(Ablehnungsgrund::IdentityMismatch),
            Self::RateLimitiert { .. } => Some(Ablehnungsgrund::RateLimited),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = LobbyError::UngueltigeSignatur(SignaturFehler::KryptografischUngueltig);
        assert_eq!(
            e.to_string(),
            "Ungueltige Signatur: Signatur passt nicht zu Inhalt und Absender"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(LobbyError::Transport("reset".into()).ist_wiederholbar());
        assert!(!LobbyError::IdentitaetAbweichend.ist_wiederholbar());
    }

    #[test]
    fn nur_transport_und_rate_limit_fuer_benutzer() {
        assert!(LobbyError::RateLimitiert { retry_after_ms: 10 }.fuer_benutzer_relevant());
        assert!(!LobbyError::UngueltigeNachricht("x".into()).fuer_benutzer_relevant());
        assert!(!LobbyError::HandshakeZeitlimit.fuer_benutzer_relevant());
    }

    #[test]
    fn signaturfehler_abbildung() {
        assert_eq!(
            Ablehnungsgrund::from(SignaturFehler::Fehlend),
            Ablehnungsgrund::MissingSignature
        );
    }

    #[test]
    fn ablehnungsgrund_serialisierung() {
        let json = serde_json::to_string(&Ablehnungsgrund::CryptographicMismatch).unwrap();
        assert_eq!(json, "\"CRYPTOGRAPHIC_MISMATCH\"");
    }

    #[test]
    fn ablehnungsgrund_aus_fehler() {
        assert_eq!(
            LobbyError::RateLimitiert { retry_after_ms: 1 }.ablehnungsgrund(),
            Some(Ablehnungsgrund::RateLimited)
        );
        assert_eq!(LobbyError::HandshakeZeitlimit.ablehnungsgrund(), None);
    }
}
