//! Fehlertypen fuer den Signaling-Service

use lobbykey_crypto::CryptoError;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Kryptografiefehler (z.B. Zufallsquelle nicht verfuegbar)
    #[error("Kryptografiefehler: {0}")]
    Krypto(#[from] CryptoError),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Keine Antwort auf die Challenge innerhalb des Zeitlimits
    #[error("Handshake-Zeitlimit ueberschritten")]
    HandshakeZeitlimit,

    /// Handshake abgelehnt
    #[error("Handshake abgelehnt: {0}")]
    HandshakeAbgelehnt(String),

    /// Identitaet ist bereits online (Doppel-Login-Politik `reject`)
    #[error("Identitaet ist bereits online")]
    BereitsOnline,

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Senden an Client fehlgeschlagen (Channel geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Timeout (Keepalive)
    #[error("Timeout")]
    Timeout,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
