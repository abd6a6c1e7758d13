//! Message-Dispatcher – Routet eingehende Frames authentifizierter Sessions
//!
//! Vor dem Handshake verarbeitet die `ClientConnection` Frames selbst; der
//! Dispatcher sieht nur Frames von Sessions mit gebundener Identitaet.

use lobbykey_core::{PublicKey, SessionId};
use lobbykey_protocol::message::{LobbyMessageData, VerificationStatus};
use lobbykey_protocol::{Empfangen, ErrorCode, Payload, WireMessage};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::server_state::LobbyState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Session
#[derive(Debug, Clone)]
pub struct SessionKontext {
    pub session_id: SessionId,
    pub public_key: PublicKey,
    pub peer_addr: SocketAddr,
}

/// Was die Verbindung nach dem Dispatch tun soll
#[derive(Debug)]
pub enum Aktion {
    /// Antwort an den Client senden
    Antwort(WireMessage),
    /// Nichts senden
    Keine,
    /// Session sauber beenden
    Abmelden,
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<LobbyState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<LobbyState>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen empfangenen Frame
    ///
    /// Kein Fehler in einem Frame beendet die Verbindung; nur `logout` tut das.
    pub fn dispatch(&self, empfangen: Empfangen, ctx: &SessionKontext) -> Aktion {
        let nachricht = match empfangen {
            Ok(n) => n,
            Err(fehler) => {
                tracing::debug!(session = %ctx.session_id, fehler = %fehler, "Ungueltiger Frame");
                return Aktion::Antwort(WireMessage::error(ErrorCode::MalformedMessage, fehler.grund));
            }
        };

        match nachricht.payload {
            Payload::LobbyMessage(daten) => Aktion::Antwort(self.lobby_nachricht(&daten, ctx)),

            Payload::Ping(ping) => Aktion::Antwort(WireMessage::pong(ping.timestamp_ms)),
            Payload::Pong(_) => Aktion::Keine,

            Payload::PresenceRequest(_) => Aktion::Antwort(WireMessage::neu(
                Payload::PresenceSnapshot(self.state.presence_snapshot()),
            )),

            Payload::Logout(logout) => {
                tracing::info!(
                    session = %ctx.session_id,
                    grund = logout.reason.as_deref().unwrap_or("-"),
                    "Abmeldung"
                );
                Aktion::Abmelden
            }

            Payload::AuthRequest(_) => Aktion::Antwort(WireMessage::error(
                ErrorCode::HandshakeRejected,
                "Session ist bereits authentifiziert",
            )),

            Payload::Unknown(typ) => Aktion::Antwort(WireMessage::error(
                ErrorCode::UnknownMessageType,
                format!("Unbekannter Nachrichtentyp: {typ}"),
            )),

            andere => Aktion::Antwort(WireMessage::error(
                ErrorCode::MalformedMessage,
                format!("'{}' wird vom Client nicht erwartet", andere.typ()),
            )),
        }
    }

    fn lobby_nachricht(&self, daten: &LobbyMessageData, ctx: &SessionKontext) -> WireMessage {
        let signatur = daten.signature.clone();
        let status = match self
            .state
            .message_bus
            .submit(daten, &ctx.public_key, &ctx.session_id)
        {
            Ok(annahme) => {
                VerificationStatus::angenommen(signatur, annahme.sequence_id, annahme.duplikat)
            }
            Err(ablehnung) => {
                let mut status = VerificationStatus::abgelehnt(signatur, ablehnung.grund, ablehnung.detail);
                status.retry_after_ms = ablehnung.retry_after.map(|d| d.as_millis() as u64);
                status
            }
        };
        WireMessage::neu(Payload::VerificationStatus(status))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InMemoryProfile;
    use crate::server_state::LobbyKonfig;
    use lobbykey_core::{zeitstempel_jetzt, Ablehnungsgrund, SequenceId};
    use lobbykey_crypto::{nachricht_signieren, Identity};
    use lobbykey_observability::LobbyMetrics;
    use lobbykey_protocol::message::{Logout, PresenceRequest, Verifikation};
    use lobbykey_protocol::UngueltigerFrame;

    fn aufbau(id: &Identity) -> (MessageDispatcher, SessionKontext) {
        let state = LobbyState::neu(
            LobbyKonfig::default(),
            Arc::new(InMemoryProfile::neu()),
            LobbyMetrics::neu().unwrap(),
        );
        let ctx = SessionKontext {
            session_id: SessionId::new(),
            public_key: id.public_key(),
            peer_addr: "127.0.0.1:5000".parse().unwrap(),
        };
        (MessageDispatcher::neu(state), ctx)
    }

    fn antwort(aktion: Aktion) -> Payload {
        match aktion {
            Aktion::Antwort(msg) => msg.payload,
            andere => panic!("Antwort erwartet, erhalten: {andere:?}"),
        }
    }

    fn fehlercode(aktion: Aktion) -> ErrorCode {
        match antwort(aktion) {
            Payload::Error(e) => e.code,
            andere => panic!("Fehler erwartet, erhalten: {andere:?}"),
        }
    }

    #[test]
    fn ping_wird_mit_pong_beantwortet() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        match antwort(d.dispatch(Ok(WireMessage::ping(42)), &ctx)) {
            Payload::Pong(p) => assert_eq!(p.echo_timestamp_ms, 42),
            andere => panic!("unerwartet: {andere:?}"),
        }
        assert!(matches!(d.dispatch(Ok(WireMessage::pong(1)), &ctx), Aktion::Keine));
    }

    #[test]
    fn lobby_nachricht_liefert_verification_status() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let ts = zeitstempel_jetzt();
        let sig = nachricht_signieren(&id, "hallo", ts);
        let daten = LobbyMessageData::signiert("hallo", &id.public_key(), &sig, &ts);

        match antwort(d.dispatch(Ok(WireMessage::neu(Payload::LobbyMessage(daten))), &ctx)) {
            Payload::VerificationStatus(s) => {
                assert_eq!(s.status, Verifikation::Accepted);
                assert_eq!(s.sequence_id, Some(SequenceId(1)));
                assert_eq!(s.signature, Some(sig.to_hex()));
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn nullsignatur_wird_abgelehnt() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let daten = LobbyMessageData {
            content: Some("hallo".into()),
            sender_public_key: Some(id.public_key().to_hex()),
            signature: Some(format!("0x{}", "00".repeat(64))),
            timestamp: Some("2026-01-01T00:00:00.000Z".into()),
            sequence_id: None,
        };

        match antwort(d.dispatch(Ok(WireMessage::neu(Payload::LobbyMessage(daten))), &ctx)) {
            Payload::VerificationStatus(s) => {
                assert_eq!(s.status, Verifikation::Rejected);
                assert_eq!(s.error_kind, Some(Ablehnungsgrund::CryptographicMismatch));
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn rate_limit_setzt_retry_after() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let mut letzte = None;
        for i in 0..15 {
            let ts = zeitstempel_jetzt();
            let content = format!("n{i}");
            let sig = nachricht_signieren(&id, &content, ts);
            let daten = LobbyMessageData::signiert(content, &id.public_key(), &sig, &ts);
            if let Payload::VerificationStatus(s) =
                antwort(d.dispatch(Ok(WireMessage::neu(Payload::LobbyMessage(daten))), &ctx))
            {
                letzte = Some(s);
            }
        }
        let letzte = letzte.unwrap();
        assert_eq!(letzte.error_kind, Some(Ablehnungsgrund::RateLimited));
        assert!(letzte.retry_after_ms.is_some());
    }

    #[test]
    fn ungueltiger_frame_ist_malformed() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let fehler = UngueltigerFrame {
            grund: "kein JSON".into(),
        };
        assert_eq!(fehlercode(d.dispatch(Err(fehler), &ctx)), ErrorCode::MalformedMessage);
    }

    #[test]
    fn unbekannter_typ() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let msg = WireMessage::neu(Payload::Unknown("teleport".into()));
        assert_eq!(fehlercode(d.dispatch(Ok(msg), &ctx)), ErrorCode::UnknownMessageType);
    }

    #[test]
    fn zweiter_auth_request_wird_abgelehnt() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let msg = WireMessage::neu(Payload::AuthRequest(
            lobbykey_protocol::message::AuthRequest {
                public_key: id.public_key().to_hex(),
                signature: None,
                profile_name: None,
            },
        ));
        assert_eq!(fehlercode(d.dispatch(Ok(msg), &ctx)), ErrorCode::HandshakeRejected);
    }

    #[test]
    fn presence_request_liefert_snapshot() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let msg = WireMessage::neu(Payload::PresenceRequest(PresenceRequest {}));
        match antwort(d.dispatch(Ok(msg), &ctx)) {
            Payload::PresenceSnapshot(s) => assert_eq!(s.online_count, 0),
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn logout_beendet_session() {
        let id = Identity::generate();
        let (d, ctx) = aufbau(&id);
        let msg = WireMessage::neu(Payload::Logout(Logout::default()));
        assert!(matches!(d.dispatch(Ok(msg), &ctx), Aktion::Abmelden));
    }
}
