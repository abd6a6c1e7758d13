//! TCP-Verbindung zum Lobbykey-Server
//!
//! Kapselt den Frame-Transport und den Client-Teil des Handshakes.
//! Server-Pings werden waehrend des Handshakes automatisch beantwortet.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use lobbykey_crypto::{challenge_signieren, Challenge, Identity};
use lobbykey_protocol::message::{AuthRequest, AuthResponse, Logout, Payload};
use lobbykey_protocol::{Empfangen, FrameCodec, WireMessage};

use crate::error::{ClientError, ClientResult};

/// Aktive Verbindung zum Server
pub struct ServerConnection {
    framed: Framed<TcpStream, FrameCodec>,
}

impl ServerConnection {
    /// Baut die TCP-Verbindung auf
    pub async fn verbinden(adresse: &str, zeitlimit: Duration) -> ClientResult<Self> {
        let stream = tokio::time::timeout(zeitlimit, TcpStream::connect(adresse))
            .await
            .map_err(|_| ClientError::Zeitlimit("Verbindungsaufbau"))??;
        stream.set_nodelay(true)?;
        tracing::debug!(adresse, "TCP-Verbindung aufgebaut");
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
        })
    }

    /// Wartet auf die Challenge, signiert sie und wartet auf `auth_response`
    pub async fn authentifizieren(
        &mut self,
        identity: &Identity,
        profile_name: Option<&str>,
        zeitlimit: Duration,
    ) -> ClientResult<AuthResponse> {
        tokio::time::timeout(zeitlimit, self.handshake(identity, profile_name))
            .await
            .map_err(|_| ClientError::Zeitlimit("Handshake"))?
    }

    async fn handshake(
        &mut self,
        identity: &Identity,
        profile_name: Option<&str>,
    ) -> ClientResult<AuthResponse> {
        let challenge = loop {
            match self.naechste_nachricht().await? {
                Payload::AuthChallenge(c) => break c,
                andere => self.vor_anmeldung(andere).await?,
            }
        };

        let challenge = Challenge::from_hex(&challenge.challenge)
            .map_err(|e| ClientError::Protokoll(format!("Challenge: {e}")))?;
        let signatur = challenge_signieren(identity, &challenge);
        self.senden(WireMessage::neu(Payload::AuthRequest(AuthRequest {
            public_key: identity.public_key().to_hex(),
            signature: Some(signatur.to_hex()),
            profile_name: profile_name.map(str::to_string),
        })))
        .await?;

        loop {
            match self.naechste_nachricht().await? {
                Payload::AuthResponse(antwort) if antwort.success => return Ok(antwort),
                Payload::AuthResponse(antwort) => {
                    let grund = antwort.error.unwrap_or_else(|| "ohne Begruendung".into());
                    return Err(ClientError::HandshakeAbgelehnt(match antwort.error_code {
                        Some(code) => format!("{code:?}: {grund}"),
                        None => grund,
                    }));
                }
                andere => self.vor_anmeldung(andere).await?,
            }
        }
    }

    /// Behandelt Frames, die waehrend des Handshakes eintreffen
    async fn vor_anmeldung(&mut self, payload: Payload) -> ClientResult<()> {
        match payload {
            Payload::Ping(ping) => self.senden(WireMessage::pong(ping.timestamp_ms)).await,
            Payload::Error(fehler) => Err(ClientError::Server {
                code: fehler.code,
                message: fehler.message,
            }),
            andere => {
                tracing::debug!(typ = andere.typ(), "Frame vor Anmeldung ignoriert");
                Ok(())
            }
        }
    }

    /// Naechster Frame; ungueltige Frames werden dem Aufrufer gemeldet
    pub async fn naechste(&mut self) -> ClientResult<Empfangen> {
        match self.framed.next().await {
            Some(Ok(empfangen)) => Ok(empfangen),
            Some(Err(e)) => Err(ClientError::Io(e)),
            None => Err(ClientError::Getrennt),
        }
    }

    async fn naechste_nachricht(&mut self) -> ClientResult<Payload> {
        loop {
            match self.naechste().await? {
                Ok(nachricht) => return Ok(nachricht.payload),
                Err(ungueltig) => tracing::warn!(grund = %ungueltig.grund, "Ungueltiger Frame vom Server"),
            }
        }
    }

    pub async fn senden(&mut self, nachricht: WireMessage) -> ClientResult<()> {
        self.framed.send(nachricht).await.map_err(ClientError::Io)
    }

    /// Sendet `logout`; die Verbindung schliesst danach der Server
    pub async fn abmelden(&mut self, grund: Option<String>) -> ClientResult<()> {
        self.senden(WireMessage::neu(Payload::Logout(Logout { reason: grund })))
            .await
    }
}
