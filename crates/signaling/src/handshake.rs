//! Server-seitiger Authentifizierungs-Handshake
//!
//! ```text
//! Verbindend -> ChallengeAusgestellt -> Pruefend -> Authentifiziert
//!                        |                   |
//!                        +----> Abgelehnt <--+
//! ```
//!
//! Die Challenge ist einmalig: sie wird bei der ersten Antwort verbraucht,
//! unabhaengig vom Ergebnis.

use lobbykey_core::{PublicKey, SignaturFehler};
use lobbykey_crypto::Challenge;
use lobbykey_protocol::message::{AuthChallenge, AuthRequest};
use std::time::Duration;
use thiserror::Error;

use crate::error::{SignalingError, SignalingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeZustand {
    Verbindend,
    ChallengeAusgestellt,
    Pruefend,
    Authentifiziert(PublicKey),
    Abgelehnt,
}

/// Grund fuer einen abgelehnten Handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeFehler {
    #[error("Keine offene Challenge")]
    KeineChallenge,

    #[error("Ungueltiger Public Key")]
    UngueltigerPublicKey,

    #[error("{0}")]
    Signatur(#[from] SignaturFehler),
}

/// Handshake einer einzelnen Verbindung
pub struct AuthHandshake {
    zustand: HandshakeZustand,
    challenge: Option<Challenge>,
    zeitlimit: Duration,
}

impl AuthHandshake {
    pub fn neu(zeitlimit: Duration) -> Self {
        Self {
            zustand: HandshakeZustand::Verbindend,
            challenge: None,
            zeitlimit,
        }
    }

    /// Erzeugt eine frische Challenge aus dem OS-Zufallsgenerator
    pub fn challenge_ausstellen(&mut self, server_name: &str) -> SignalingResult<AuthChallenge> {
        if self.zustand != HandshakeZustand::Verbindend {
            return Err(SignalingError::protokoll("Challenge bereits ausgestellt"));
        }
        let challenge = Challenge::erzeugen()?;
        let nachricht = AuthChallenge {
            challenge: challenge.to_hex(),
            server_name: server_name.to_string(),
            timeout_ms: self.zeitlimit.as_millis() as u64,
        };
        self.challenge = Some(challenge);
        self.zustand = HandshakeZustand::ChallengeAusgestellt;
        Ok(nachricht)
    }

    /// Prueft die Antwort des Clients und verbraucht die Challenge
    pub fn antwort_pruefen(&mut self, anfrage: &AuthRequest) -> Result<PublicKey, HandshakeFehler> {
        let challenge = match (self.zustand, self.challenge.take()) {
            (HandshakeZustand::ChallengeAusgestellt, Some(c)) => c,
            _ => {
                self.zustand = HandshakeZustand::Abgelehnt;
                return Err(HandshakeFehler::KeineChallenge);
            }
        };
        self.zustand = HandshakeZustand::Pruefend;

        let ergebnis = PublicKey::from_hex(&anfrage.public_key)
            .map_err(|_| HandshakeFehler::UngueltigerPublicKey)
            .and_then(|pk| {
                lobbykey_crypto::antwort_pruefen(&challenge, &pk, anfrage.signature.as_deref())
                    .map(|_| pk)
                    .map_err(HandshakeFehler::from)
            });

        self.zustand = match ergebnis {
            Ok(pk) => HandshakeZustand::Authentifiziert(pk),
            Err(_) => HandshakeZustand::Abgelehnt,
        };
        ergebnis
    }

    /// Zeitlimit abgelaufen
    pub fn ablehnen(&mut self) {
        self.challenge = None;
        self.zustand = HandshakeZustand::Abgelehnt;
    }

    pub fn zustand(&self) -> HandshakeZustand {
        self.zustand
    }

    pub fn zeitlimit(&self) -> Duration {
        self.zeitlimit
    }
}
