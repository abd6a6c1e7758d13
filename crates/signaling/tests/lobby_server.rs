//! Integration-Tests fuer den Lobby-Server
//!
//! Startet einen echten TCP-Server auf 127.0.0.1:0 und spricht das
//! Draht-Protokoll direkt ueber `FrameCodec`.

use futures_util::{SinkExt, StreamExt};
use lobbykey_core::{zeitstempel_jetzt, Ablehnungsgrund, PublicKey};
use lobbykey_crypto::{challenge_signieren, nachricht_signieren, Challenge, Identity};
use lobbykey_observability::LobbyMetrics;
use lobbykey_protocol::message::{
    AuthRequest, AuthResponse, LobbyMessageData, Logout, PresenceRequest, Verifikation,
    VerificationStatus,
};
use lobbykey_protocol::{ErrorCode, FrameCodec, Payload, WireMessage};
use lobbykey_signaling::{
    DoppelLoginPolitik, InMemoryProfile, LobbyKonfig, LobbyState, ProfileStore, SignalingServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

const FRIST: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<LobbyState>,
    handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn server_starten(config: LobbyKonfig) -> TestServer {
    let profile = Arc::new(InMemoryProfile::neu());
    profile
        .registrieren(Identity::from_bytes(&[0x11; 32]).public_key(), "alice")
        .unwrap();
    let state = LobbyState::neu(config, profile, LobbyMetrics::neu().unwrap());
    let server = SignalingServer::binden(Arc::clone(&state), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server.starten(shutdown_rx));
    TestServer {
        addr,
        shutdown_tx,
        state,
        handle,
    }
}

struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
    id: Identity,
}

impl TestClient {
    async fn roh(addr: SocketAddr, id: Identity) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            id,
        }
    }

    /// Verbindet und authentifiziert sich; gibt die `auth_response` zurueck
    async fn verbinden(addr: SocketAddr, seed: u8) -> (Self, AuthResponse) {
        let mut client = Self::roh(addr, Identity::from_bytes(&[seed; 32])).await;
        let challenge = client.challenge().await;
        let antwort = client.authentifizieren(&challenge).await;
        assert!(antwort.success, "Handshake fehlgeschlagen: {:?}", antwort.error);
        (client, antwort)
    }

    async fn challenge(&mut self) -> Challenge {
        match self.naechste().await.payload {
            Payload::AuthChallenge(c) => Challenge::from_hex(&c.challenge).unwrap(),
            andere => panic!("auth_challenge erwartet: {andere:?}"),
        }
    }

    async fn authentifizieren(&mut self, challenge: &Challenge) -> AuthResponse {
        let sig = challenge_signieren(&self.id, challenge);
        self.senden(Payload::AuthRequest(AuthRequest {
            public_key: self.id.public_key().to_hex(),
            signature: Some(sig.to_hex()),
            profile_name: None,
        }))
        .await;
        match self.naechste().await.payload {
            Payload::AuthResponse(r) => r,
            andere => panic!("auth_response erwartet: {andere:?}"),
        }
    }

    async fn senden(&mut self, payload: Payload) {
        self.framed.send(WireMessage::neu(payload)).await.unwrap();
    }

    async fn chat(&mut self, content: &str) -> String {
        let ts = zeitstempel_jetzt();
        let sig = nachricht_signieren(&self.id, content, ts);
        self.senden(Payload::LobbyMessage(LobbyMessageData::signiert(
            content,
            &self.id.public_key(),
            &sig,
            &ts,
        )))
        .await;
        sig.to_hex()
    }

    /// Naechster Frame, Server-Pings werden uebersprungen
    async fn naechste(&mut self) -> WireMessage {
        loop {
            let frame = tokio::time::timeout(FRIST, self.framed.next())
                .await
                .expect("Zeitlimit beim Warten auf Frame")
                .expect("Verbindung geschlossen")
                .expect("IO-Fehler")
                .expect("ungueltiger Frame");
            if !matches!(frame.payload, Payload::Ping(_)) {
                return frame;
            }
        }
    }

    /// Wartet auf den ersten Frame, fuer den `f` einen Wert liefert
    async fn warten_auf<T>(&mut self, mut f: impl FnMut(Payload) -> Option<T>) -> T {
        loop {
            if let Some(wert) = f(self.naechste().await.payload) {
                return wert;
            }
        }
    }

    async fn status(&mut self) -> VerificationStatus {
        self.warten_auf(|p| match p {
            Payload::VerificationStatus(s) => Some(s),
            _ => None,
        })
        .await
    }

    async fn fehlercode(&mut self) -> ErrorCode {
        self.warten_auf(|p| match p {
            Payload::Error(e) => Some(e.code),
            _ => None,
        })
        .await
    }

    /// Prueft, dass der Server die Verbindung schliesst
    async fn geschlossen(&mut self) -> bool {
        loop {
            match tokio::time::timeout(FRIST, self.framed.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

fn pk(seed: u8) -> PublicKey {
    Identity::from_bytes(&[seed; 32]).public_key()
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zwei_clients_sehen_sich_und_verlassen() {
    let server = server_starten(LobbyKonfig::default()).await;

    let (mut a, antwort_a) = TestClient::verbinden(server.addr, 0x11).await;
    assert_eq!(antwort_a.online_count, 1);

    let (b, antwort_b) = TestClient::verbinden(server.addr, 0x22).await;
    assert_eq!(antwort_b.online_count, 2);
    let reihenfolge: Vec<PublicKey> = antwort_b.online_users.iter().map(|u| u.public_key).collect();
    assert_eq!(reihenfolge, vec![pk(0x11), pk(0x22)]);
    // Profilname aus dem Speicher
    assert_eq!(antwort_b.online_users[0].profile_name.as_deref(), Some("alice"));

    let beigetreten = a
        .warten_auf(|p| match p {
            Payload::UserJoined(u) => Some(u),
            _ => None,
        })
        .await;
    assert_eq!(beigetreten.public_key, pk(0x22));
    assert_eq!(beigetreten.online_count, 2);

    // B trennt die Verbindung
    drop(b);
    let verlassen = a
        .warten_auf(|p| match p {
            Payload::UserLeft(u) => Some(u),
            _ => None,
        })
        .await;
    assert_eq!(verlassen.public_key, pk(0x22));
    assert_eq!(verlassen.online_count, 1);
    assert_eq!(server.state.presence.count(), 1);
}

#[tokio::test]
async fn presence_request_liefert_snapshot() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;
    let (_b, antwort_b) = TestClient::verbinden(server.addr, 0x22).await;

    a.senden(Payload::PresenceRequest(PresenceRequest {})).await;
    let snapshot = a
        .warten_auf(|p| match p {
            Payload::PresenceSnapshot(s) => Some(s),
            _ => None,
        })
        .await;
    assert_eq!(snapshot.online_count, 2);
    assert_eq!(snapshot.users[1].public_key, pk(0x22));
    // Beide Beobachter sehen dieselbe Liste, Byte fuer Byte
    assert_eq!(
        serde_json::to_vec(&snapshot.users).unwrap(),
        serde_json::to_vec(&antwort_b.online_users).unwrap()
    );
}

#[tokio::test]
async fn stummer_client_wird_nach_timeout_entfernt() {
    let config = LobbyKonfig {
        keepalive_intervall: Duration::from_millis(50),
        verbindungs_timeout: Duration::from_millis(300),
        ..LobbyKonfig::default()
    };
    let server = server_starten(config).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;
    // B authentifiziert sich und sendet danach nichts mehr
    let (mut b, _) = TestClient::verbinden(server.addr, 0x22).await;
    assert_eq!(server.state.presence.count(), 2);

    // A beantwortet Pings und bleibt dadurch verbunden
    let verlassen = tokio::time::timeout(FRIST, async {
        loop {
            let frame = a.framed.next().await.unwrap().unwrap().unwrap();
            match frame.payload {
                Payload::Ping(ping) => a
                    .framed
                    .send(WireMessage::pong(ping.timestamp_ms))
                    .await
                    .unwrap(),
                Payload::UserLeft(update) => return update,
                _ => {}
            }
        }
    })
    .await
    .expect("kein user_left fuer den stummen Client");

    assert_eq!(verlassen.public_key, pk(0x22));
    assert_eq!(verlassen.online_count, 1);
    assert_eq!(server.state.presence.count(), 1);
    assert!(server.state.presence.ist_online(&pk(0x11)));
    assert!(b.geschlossen().await);
}

#[tokio::test]
async fn logout_entfernt_aus_presence() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;
    let (mut b, _) = TestClient::verbinden(server.addr, 0x22).await;

    b.senden(Payload::Logout(Logout::default())).await;
    assert!(b.geschlossen().await);

    let verlassen = a
        .warten_auf(|p| match p {
            Payload::UserLeft(u) => Some(u),
            _ => None,
        })
        .await;
    assert_eq!(verlassen.online_count, 1);
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn falsche_handshake_signatur_wird_abgelehnt() {
    let server = server_starten(LobbyKonfig::default()).await;
    let mut client = TestClient::roh(server.addr, Identity::generate()).await;
    let _challenge = client.challenge().await;

    // Signatur ueber eine andere Challenge
    let antwort = client.authentifizieren(&Challenge::erzeugen().unwrap()).await;
    assert!(!antwort.success);
    assert!(antwort.error.is_some());
    assert_eq!(antwort.error_code, Some(ErrorCode::InvalidSignature));
    assert!(client.geschlossen().await);
    assert_eq!(server.state.presence.count(), 0);
}

#[tokio::test]
async fn handshake_zeitlimit() {
    let config = LobbyKonfig {
        handshake_timeout: Duration::from_millis(100),
        ..LobbyKonfig::default()
    };
    let server = server_starten(config).await;
    let mut client = TestClient::roh(server.addr, Identity::generate()).await;
    let _challenge = client.challenge().await;

    assert_eq!(client.fehlercode().await, ErrorCode::HandshakeTimeout);
    assert!(client.geschlossen().await);
}

#[tokio::test]
async fn frames_vor_authentifizierung() {
    let server = server_starten(LobbyKonfig::default()).await;
    let mut client = TestClient::roh(server.addr, Identity::from_bytes(&[0x33; 32])).await;
    let challenge = client.challenge().await;

    client.chat("zu frueh").await;
    assert_eq!(client.fehlercode().await, ErrorCode::NotAuthenticated);

    client.senden(Payload::Unknown("teleport".into())).await;
    assert_eq!(client.fehlercode().await, ErrorCode::UnknownMessageType);

    // Challenge ist weiterhin gueltig
    let antwort = client.authentifizieren(&challenge).await;
    assert!(antwort.success);
}

#[tokio::test]
async fn zweite_anmeldung_ersetzt_erste() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut erste, _) = TestClient::verbinden(server.addr, 0x11).await;
    let (_zweite, antwort) = TestClient::verbinden(server.addr, 0x11).await;
    assert_eq!(antwort.online_count, 1);

    assert_eq!(erste.fehlercode().await, ErrorCode::Superseded);
    assert!(erste.geschlossen().await);
    assert_eq!(server.state.presence.count(), 1);
}

#[tokio::test]
async fn reject_politik_lehnt_zweite_anmeldung_ab() {
    let config = LobbyKonfig {
        doppel_login: DoppelLoginPolitik::Reject,
        ..LobbyKonfig::default()
    };
    let server = server_starten(config).await;
    let (_erste, _) = TestClient::verbinden(server.addr, 0x11).await;

    let mut zweite = TestClient::roh(server.addr, Identity::from_bytes(&[0x11; 32])).await;
    let challenge = zweite.challenge().await;
    let antwort = zweite.authentifizieren(&challenge).await;
    assert!(!antwort.success);
    assert_eq!(antwort.error_code, Some(ErrorCode::AlreadyOnline));
    assert!(zweite.geschlossen().await);
}

#[tokio::test]
async fn server_voll() {
    let config = LobbyKonfig {
        max_clients: 1,
        ..LobbyKonfig::default()
    };
    let server = server_starten(config).await;
    let (_a, _) = TestClient::verbinden(server.addr, 0x11).await;

    let mut b = TestClient::roh(server.addr, Identity::generate()).await;
    assert_eq!(b.fehlercode().await, ErrorCode::ServerFull);
}

// ---------------------------------------------------------------------------
// Nachrichten
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nachricht_erreicht_alle_mit_sequenz() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;
    let (mut b, _) = TestClient::verbinden(server.addr, 0x22).await;

    let sig = a.chat("hallo lobby").await;
    let status = a.status().await;
    assert_eq!(status.status, Verifikation::Accepted);
    assert_eq!(status.signature.as_deref(), Some(sig.as_str()));

    let bei_b = b
        .warten_auf(|p| match p {
            Payload::LobbyMessage(m) => Some(m),
            _ => None,
        })
        .await;
    assert_eq!(bei_b.content.as_deref(), Some("hallo lobby"));
    assert_eq!(bei_b.sequence_id, status.sequence_id);
    assert_eq!(bei_b.sender_public_key, Some(pk(0x11).to_hex()));
}

#[tokio::test]
async fn nullsignatur_wird_abgelehnt_verbindung_bleibt() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;

    a.senden(Payload::LobbyMessage(LobbyMessageData {
        content: Some("gefaelscht".into()),
        sender_public_key: Some(pk(0x11).to_hex()),
        signature: Some(format!("0x{}", "00".repeat(64))),
        timestamp: Some("2026-01-01T00:00:00.000Z".into()),
        sequence_id: None,
    }))
    .await;
    let status = a.status().await;
    assert_eq!(status.status, Verifikation::Rejected);
    assert_eq!(status.error_kind, Some(Ablehnungsgrund::CryptographicMismatch));

    // Verbindung ist weiterhin nutzbar
    a.chat("echt").await;
    assert_eq!(a.status().await.status, Verifikation::Accepted);
}

#[tokio::test]
async fn rate_limit_betrifft_nur_eine_session() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;
    let (mut b, _) = TestClient::verbinden(server.addr, 0x22).await;

    for i in 0..15 {
        a.chat(&format!("schnell {i}")).await;
    }
    let mut limitiert = 0;
    for _ in 0..15 {
        let status = a.status().await;
        if status.error_kind == Some(Ablehnungsgrund::RateLimited) {
            assert!(status.retry_after_ms.is_some());
            limitiert += 1;
        }
    }
    assert!(limitiert >= 1);

    b.chat("ich darf noch").await;
    assert_eq!(b.status().await.status, Verifikation::Accepted);
}

#[tokio::test]
async fn unbekannter_typ_und_kaputtes_json_halten_verbindung() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;

    a.senden(Payload::Unknown("teleport".into())).await;
    assert_eq!(a.fehlercode().await, ErrorCode::UnknownMessageType);

    let kaputt = b"{nicht json";
    let stream = a.framed.get_mut();
    stream.write_all(&(kaputt.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(kaputt).await.unwrap();
    assert_eq!(a.fehlercode().await, ErrorCode::MalformedMessage);

    a.senden(Payload::Ping(lobbykey_protocol::message::Ping { timestamp_ms: 7 }))
        .await;
    let echo = a
        .warten_auf(|p| match p {
            Payload::Pong(p) => Some(p.echo_timestamp_ms),
            _ => None,
        })
        .await;
    assert_eq!(echo, 7);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_sendet_server_restart() {
    let server = server_starten(LobbyKonfig::default()).await;
    let (mut a, _) = TestClient::verbinden(server.addr, 0x11).await;

    server.shutdown_tx.send(true).unwrap();
    a.warten_auf(|p| match p {
        Payload::ServerRestart(_) => Some(()),
        _ => None,
    })
    .await;
    assert!(a.geschlossen().await);

    let ergebnis = tokio::time::timeout(FRIST, server.handle).await.unwrap().unwrap();
    assert!(ergebnis.is_ok());
}
