//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task.
//!
//! ## Ablauf
//! ```text
//! Verbunden -> Handshake -> Authentifiziert -> Getrennt
//!                  |                              ^
//!                  +--------- abgelehnt ----------+
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_intervall` einen Ping
//! - Ohne eingehenden Frame innerhalb von `verbindungs_timeout` wird getrennt

use futures_util::{SinkExt, StreamExt};
use lobbykey_core::PublicKey;
use lobbykey_protocol::message::{jetzt_ms, AuthResponse, PresenceUpdate, ServerRestart};
use lobbykey_protocol::{ErrorCode, FrameCodec, Payload, WireMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::dispatcher::{Aktion, MessageDispatcher, SessionKontext};
use crate::error::{SignalingError, SignalingResult};
use crate::handshake::{AuthHandshake, HandshakeFehler};
use crate::server_state::LobbyState;
use crate::session::TrennGrund;

type Verbindung<S> = Framed<S, FrameCodec>;

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne Verbindung
///
/// Liest Frames via `FrameCodec`, fuehrt den Handshake durch, dispatcht
/// danach an den `MessageDispatcher` und leitet Broadcasts weiter.
pub struct ClientConnection {
    state: Arc<LobbyState>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    pub fn neu(state: Arc<LobbyState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verarbeitung und laeuft bis die Verbindung endet oder ein
    /// Shutdown-Signal eingeht.
    pub async fn verarbeiten<S>(self, stream: S, mut shutdown_rx: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let mut framed = Framed::new(
            stream,
            FrameCodec::with_max_size(self.state.config.max_frame_groesse),
        );

        if *shutdown_rx.borrow() {
            return;
        }

        if self.state.sessions.anzahl() >= self.state.config.max_clients {
            tracing::warn!(
                peer = %peer_addr,
                max = self.state.config.max_clients,
                "Server voll – Verbindung abgelehnt"
            );
            let _ = framed
                .send(WireMessage::error(ErrorCode::ServerFull, "Server ist voll"))
                .await;
            return;
        }

        tracing::debug!(peer = %peer_addr, "Neue Verbindung");

        let (public_key, profil_wunsch) = match self.handshake(&mut framed, &mut shutdown_rx).await {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                tracing::info!(peer = %peer_addr, fehler = %e, "Handshake nicht abgeschlossen");
                return;
            }
        };

        self.sitzung(framed, public_key, profil_wunsch, shutdown_rx)
            .await;
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    async fn handshake<S>(
        &self,
        framed: &mut Verbindung<S>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SignalingResult<(PublicKey, Option<String>)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = &self.state.config;
        let metriken = &self.state.metriken;
        let mut handshake = AuthHandshake::neu(config.handshake_timeout);

        let challenge = handshake.challenge_ausstellen(&config.server_name)?;
        framed
            .send(WireMessage::neu(Payload::AuthChallenge(challenge)))
            .await?;
        let frist = Instant::now() + handshake.zeitlimit();

        loop {
            let frame = tokio::select! {
                frame = framed.next() => frame,

                _ = tokio::time::sleep_until(frist) => {
                    handshake.ablehnen();
                    metriken.handshake("timeout");
                    tracing::info!(peer = %self.peer_addr, "Handshake-Zeitlimit");
                    let _ = framed
                        .send(WireMessage::error(
                            ErrorCode::HandshakeTimeout,
                            "Keine Antwort auf die Challenge",
                        ))
                        .await;
                    return Err(SignalingError::HandshakeZeitlimit);
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Err(SignalingError::VerbindungGetrennt);
                    }
                    continue;
                }
            };

            let empfangen = match frame {
                Some(Ok(empfangen)) => empfangen,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(SignalingError::VerbindungGetrennt),
            };

            let nachricht = match empfangen {
                Ok(n) => n,
                Err(fehler) => {
                    framed
                        .send(WireMessage::error(ErrorCode::MalformedMessage, fehler.grund))
                        .await?;
                    continue;
                }
            };

            match nachricht.payload {
                Payload::AuthRequest(anfrage) => match handshake.antwort_pruefen(&anfrage) {
                    Ok(public_key) => return Ok((public_key, anfrage.profile_name)),
                    Err(fehler) => {
                        metriken.handshake("rejected");
                        tracing::warn!(
                            peer = %self.peer_addr,
                            fehler = %fehler,
                            "Handshake abgelehnt"
                        );
                        framed
                            .send(WireMessage::neu(Payload::AuthResponse(AuthResponse {
                                success: false,
                                public_key: None,
                                session_id: None,
                                error: Some(fehler.to_string()),
                                error_code: Some(ablehnungscode(&fehler)),
                                online_users: Vec::new(),
                                online_count: 0,
                            })))
                            .await?;
                        return Err(SignalingError::HandshakeAbgelehnt(fehler.to_string()));
                    }
                },
                Payload::Ping(ping) => framed.send(WireMessage::pong(ping.timestamp_ms)).await?,
                Payload::Pong(_) => {}
                Payload::Unknown(typ) => {
                    framed
                        .send(WireMessage::error(
                            ErrorCode::UnknownMessageType,
                            format!("Unbekannter Nachrichtentyp: {typ}"),
                        ))
                        .await?
                }
                andere => {
                    framed
                        .send(WireMessage::error(
                            ErrorCode::NotAuthenticated,
                            format!("'{}' erfordert Authentifizierung", andere.typ()),
                        ))
                        .await?
                }
            }
        }
    }

    /// Profilname aus dem Speicher; ein gewuenschter Name wird registriert,
    /// falls noch keiner existiert
    fn profil_bestimmen(&self, public_key: &PublicKey, wunsch: Option<String>) -> Option<String> {
        if let Some(name) = self.state.profile.profile_name(public_key) {
            return Some(name);
        }
        let wunsch = wunsch?;
        match self.state.profile.registrieren(*public_key, &wunsch) {
            Ok(()) => self.state.profile.profile_name(public_key),
            Err(e) => {
                tracing::info!(public_key = %public_key.kurz(), fehler = %e, "Profilname nicht uebernommen");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Authentifizierte Session
    // -----------------------------------------------------------------------

    async fn sitzung<S>(
        &self,
        mut framed: Verbindung<S>,
        public_key: PublicKey,
        profil_wunsch: Option<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let state = &self.state;
        let config = &state.config;
        let metriken = &state.metriken;

        let (session_id, mut trennen_rx) = state.sessions.erstellen(public_key, self.peer_addr);
        let mut ausgehend_rx = state.broadcaster.client_registrieren(session_id);
        let profile_name = self.profil_bestimmen(&public_key, profil_wunsch);

        let beitritt = match state.presence.beitreten(
            public_key,
            profile_name.clone(),
            session_id,
            config.doppel_login,
        ) {
            Ok(b) => b,
            Err(e) => {
                metriken.handshake("rejected");
                tracing::info!(public_key = %public_key.kurz(), "Identitaet bereits online – abgelehnt");
                state.broadcaster.client_entfernen(&session_id);
                state.sessions.entfernen(&session_id);
                let _ = framed
                    .send(WireMessage::neu(Payload::AuthResponse(AuthResponse {
                        success: false,
                        public_key: Some(public_key),
                        session_id: None,
                        error: Some(e.to_string()),
                        error_code: Some(ErrorCode::AlreadyOnline),
                        online_users: Vec::new(),
                        online_count: 0,
                    })))
                    .await;
                return;
            }
        };

        metriken.handshake("ok");

        match beitritt.ersetzt {
            Some(alte_session) => {
                state.sessions.trennen(&alte_session, TrennGrund::Ersetzt);
            }
            None => {
                state.broadcaster.an_alle_ausser_senden(
                    &session_id,
                    WireMessage::neu(Payload::UserJoined(PresenceUpdate {
                        public_key,
                        profile_name: profile_name.clone(),
                        online_count: beitritt.online_count,
                    })),
                );
            }
        }

        let snapshot = state.presence_snapshot();
        let antwort = WireMessage::neu(Payload::AuthResponse(AuthResponse {
            success: true,
            public_key: Some(public_key),
            session_id: Some(session_id),
            error: None,
            error_code: None,
            online_count: snapshot.online_count,
            online_users: snapshot.users,
        }));

        tracing::info!(
            peer = %self.peer_addr,
            session = %session_id,
            public_key = %public_key.kurz(),
            "Session authentifiziert"
        );

        let ctx = SessionKontext {
            session_id,
            public_key,
            peer_addr: self.peer_addr,
        };

        let grund = if framed.send(antwort).await.is_err() {
            "auth_response nicht zustellbar"
        } else {
            self.schleife(&mut framed, &ctx, &mut ausgehend_rx, &mut trennen_rx, &mut shutdown_rx)
                .await
        };

        // Cleanup beim Verbindungsende
        state.broadcaster.client_entfernen(&session_id);
        state.message_bus.session_entfernen(&session_id);
        state.sessions.entfernen(&session_id);

        if let Some(austritt) = state.presence.verlassen(&public_key, &session_id) {
            state.broadcaster.an_alle_senden(WireMessage::neu(Payload::UserLeft(PresenceUpdate {
                public_key,
                profile_name: austritt.eintrag.profile_name,
                online_count: austritt.online_count,
            })));
        }

        tracing::info!(
            peer = %self.peer_addr,
            session = %session_id,
            grund,
            "Session beendet"
        );
    }

    async fn schleife<S>(
        &self,
        framed: &mut Verbindung<S>,
        ctx: &SessionKontext,
        ausgehend_rx: &mut tokio::sync::mpsc::Receiver<WireMessage>,
        trennen_rx: &mut watch::Receiver<Option<TrennGrund>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> &'static str
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let keepalive = self.state.config.keepalive_intervall;
        let timeout = self.state.config.verbindungs_timeout;
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive;

        loop {
            let timeout_frist = letzter_empfang + timeout;
            let weckzeit = naechster_ping.min(timeout_frist);

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(empfangen)) => {
                            letzter_empfang = Instant::now();
                            self.state.sessions.aktivitaet(&ctx.session_id);

                            match dispatcher.dispatch(empfangen, ctx) {
                                Aktion::Antwort(antwort) => {
                                    if let Err(e) = framed.send(antwort).await {
                                        tracing::warn!(session = %ctx.session_id, fehler = %e, "Senden fehlgeschlagen");
                                        return "senden fehlgeschlagen";
                                    }
                                }
                                Aktion::Keine => {}
                                Aktion::Abmelden => return "logout",
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(session = %ctx.session_id, fehler = %e, "Frame-Lesefehler");
                            return "frame-fehler";
                        }
                        None => return "vom client getrennt",
                    }
                }

                // Ausgehende Nachricht aus dem Broadcaster
                Some(ausgehend) = ausgehend_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(session = %ctx.session_id, fehler = %e, "Broadcast-Senden fehlgeschlagen");
                        return "senden fehlgeschlagen";
                    }
                }

                // Keepalive und Timeout
                _ = tokio::time::sleep_until(weckzeit) => {
                    let jetzt = Instant::now();
                    if jetzt >= timeout_frist {
                        tracing::warn!(session = %ctx.session_id, "Verbindungs-Timeout");
                        return "timeout";
                    }
                    if jetzt >= naechster_ping {
                        if framed.send(WireMessage::ping(jetzt_ms())).await.is_err() {
                            return "ping fehlgeschlagen";
                        }
                        naechster_ping = jetzt + keepalive;
                    }
                }

                // Trennung von aussen
                Ok(()) = trennen_rx.changed() => {
                    let grund = *trennen_rx.borrow();
                    match grund {
                        Some(TrennGrund::Ersetzt) => {
                            let _ = framed
                                .send(WireMessage::error(
                                    ErrorCode::Superseded,
                                    "Neue Anmeldung mit derselben Identitaet",
                                ))
                                .await;
                            return "ersetzt";
                        }
                        None => {}
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = framed.send(server_restart()).await;
                        return "server-neustart";
                    }
                }
            }
        }
    }
}

/// Fehlercode fuer `auth_response` bei abgelehntem Handshake
fn ablehnungscode(fehler: &HandshakeFehler) -> ErrorCode {
    match fehler {
        HandshakeFehler::Signatur(_) => ErrorCode::InvalidSignature,
        HandshakeFehler::KeineChallenge | HandshakeFehler::UngueltigerPublicKey => {
            ErrorCode::HandshakeRejected
        }
    }
}

fn server_restart() -> WireMessage {
    WireMessage::neu(Payload::ServerRestart(ServerRestart {
        reason: Some("Server wird heruntergefahren".into()),
    }))
}
