//! Fehlertypen fuer den Lobbykey-Client

use lobbykey_core::LobbyError;
use lobbykey_protocol::{ErrorCode, UngueltigerFrame};
use thiserror::Error;

/// Fehler auf Client-Seite
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Verbindung zum Server getrennt")]
    Getrennt,

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(&'static str),

    #[error("Handshake abgelehnt: {0}")]
    HandshakeAbgelehnt(String),

    #[error("Server-Fehler {code:?}: {message}")]
    Server { code: ErrorCode, message: String },

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Offline-Queue voll (Kapazitaet {kapazitaet})")]
    QueueFull { kapazitaet: usize },

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Client wurde beendet")]
    Beendet,
}

impl ClientError {
    /// Fehler, nach denen eine neue Verbindung sinnvoll ist
    pub fn ist_transportfehler(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Getrennt | Self::Zeitlimit(_))
    }
}

impl From<UngueltigerFrame> for ClientError {
    fn from(fehler: UngueltigerFrame) -> Self {
        Self::Protokoll(fehler.to_string())
    }
}

/// Einordnung fuer die Anwendung: nur Transport und Rate-Limit sind
/// fuer den Benutzer relevant
impl From<ClientError> for LobbyError {
    fn from(fehler: ClientError) -> Self {
        match fehler {
            ClientError::Zeitlimit("Handshake") => LobbyError::HandshakeZeitlimit,
            ClientError::Io(e) => LobbyError::Transport(e.to_string()),
            ClientError::Getrennt | ClientError::Zeitlimit(_) => {
                LobbyError::Transport(fehler.to_string())
            }
            ClientError::HandshakeAbgelehnt(grund) => LobbyError::HandshakeAbgelehnt(grund),
            ClientError::UngueltigeNachricht(grund) => LobbyError::UngueltigeNachricht(grund),
            andere => LobbyError::intern(andere.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
