//! Verbindungs-Manager des Clients
//!
//! Eine einzige Hintergrund-Task besitzt den Transport. Sie verbindet,
//! authentifiziert, leert die Offline-Queue, verarbeitet eingehende Frames
//! und verbindet nach Transportverlust oder `server_restart` mit Backoff neu.
//!
//! ```text
//! Getrennt -> Verbindend -> Authentifizierend -> Verbunden
//!                 ^                                  |
//!                 +---- Wiederverbindend(n) <--------+
//! ```
//!
//! Die Anwendung spricht nur mit [`LobbyClient`]: `senden()` signiert,
//! reiht ein und weckt die Task, ohne zu blockieren.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use lobbykey_core::message::zeitstempel_jetzt;
use lobbykey_core::{
    Ablehnungsgrund, LobbyError, LobbyMessage, PublicKey, SequenceId, SessionId,
};
use lobbykey_crypto::{nachricht_signieren, Identity};
use lobbykey_protocol::message::{
    AuthResponse, LobbyMessageData, PresenceUpdate, Verifikation, VerificationStatus,
};
use lobbykey_protocol::{ErrorCode, Payload, WireMessage};

use crate::backoff::{Backoff, BackoffKonfig};
use crate::connection::ServerConnection;
use crate::error::{ClientError, ClientResult};
use crate::lobby::LobbyAnsicht;
use crate::offline_queue::{OfflineQueue, DEFAULT_KAPAZITAET};
use crate::verifikation::nachricht_pruefen;

// ---------------------------------------------------------------------------
// Konfiguration, Status, Events
// ---------------------------------------------------------------------------

/// Pause nach `RATE_LIMITED` ohne `retryAfterMs`
const RATE_LIMIT_STANDARD_PAUSE: Duration = Duration::from_secs(1);
/// Untergrenze, damit ein knapp verfehltes Fenster nicht im Takt abgefragt wird
const RATE_LIMIT_MIN_PAUSE: Duration = Duration::from_millis(20);

/// Client-Konfiguration
#[derive(Debug, Clone)]
pub struct ClientKonfig {
    /// Server-Adresse (host:port)
    pub server_adresse: String,
    /// Gewuenschter Anzeigename beim ersten Login
    pub profile_name: Option<String>,
    pub backoff: BackoffKonfig,
    pub queue_kapazitaet: usize,
    /// Zeitlimit fuer Verbindungsaufbau und Handshake
    pub verbindungs_zeitlimit: Duration,
    /// Ohne eingehenden Frame gilt die Verbindung danach als tot
    pub empfangs_zeitlimit: Duration,
}

impl ClientKonfig {
    pub fn neu(server_adresse: impl Into<String>) -> Self {
        Self {
            server_adresse: server_adresse.into(),
            profile_name: None,
            backoff: BackoffKonfig::default(),
            queue_kapazitaet: DEFAULT_KAPAZITAET,
            verbindungs_zeitlimit: Duration::from_secs(10),
            empfangs_zeitlimit: Duration::from_secs(90),
        }
    }
}

/// Verbindungszustand aus Sicht der Anwendung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbindungsStatus {
    Getrennt,
    Verbindend,
    Authentifizierend,
    Verbunden,
    Wiederverbindend { versuch: u32 },
}

/// Ereignisse fuer die Anwendung
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Anmeldung erfolgreich
    Verbunden {
        session_id: Option<SessionId>,
        online_count: usize,
    },
    /// Verbindung verloren, Wiederverbindung folgt
    Getrennt { grund: String },
    /// Empfangene Nachricht mit gueltiger Signatur
    NachrichtVerifiziert(LobbyMessage),
    /// Empfangene Nachricht, deren Pruefung fehlschlug
    NachrichtAbgelehnt {
        grund: Ablehnungsgrund,
        daten: LobbyMessageData,
    },
    /// Eigene Nachricht vom Server angenommen
    Zugestellt {
        signatur: Option<String>,
        sequence_id: Option<SequenceId>,
        duplikat: bool,
    },
    /// Eigene Nachricht wegen Rate-Limit zurueckgestellt; sie bleibt in der
    /// Queue und wird nach `retry_after` erneut gesendet
    RateLimitiert {
        signatur: Option<String>,
        retry_after: Option<Duration>,
    },
    /// Eigene Nachricht aus anderem Grund abgelehnt
    SendenAbgelehnt {
        signatur: Option<String>,
        grund: Option<Ablehnungsgrund>,
        detail: Option<String>,
    },
    Beigetreten(PresenceUpdate),
    Verlassen(PresenceUpdate),
    /// Online-Liste hat sich geaendert
    Anwesenheit { online_count: usize, anzeige: String },
    ServerNeustart { grund: Option<String> },
    /// Dieselbe Identitaet hat sich anderswo angemeldet
    Ersetzt,
    ServerFehler { code: ErrorCode, message: String },
}

// ---------------------------------------------------------------------------
// LobbyClient
// ---------------------------------------------------------------------------

/// Zwischen Handle und Task geteilter Zustand
struct Geteilt {
    identity: Identity,
    queue: Mutex<OfflineQueue>,
    lobby: Mutex<LobbyAnsicht>,
    senden_signal: Notify,
}

/// Handle der Anwendung auf die Lobby-Verbindung
pub struct LobbyClient {
    geteilt: Arc<Geteilt>,
    status_rx: watch::Receiver<VerbindungsStatus>,
    stopp_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LobbyClient {
    /// Startet die Verbindungs-Task; muss innerhalb einer Tokio-Runtime
    /// aufgerufen werden
    pub fn starten(
        konfig: ClientKonfig,
        identity: Identity,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let geteilt = Arc::new(Geteilt {
            identity,
            queue: Mutex::new(OfflineQueue::neu(konfig.queue_kapazitaet)),
            lobby: Mutex::new(LobbyAnsicht::neu()),
            senden_signal: Notify::new(),
        });
        let (status_tx, status_rx) = watch::channel(VerbindungsStatus::Getrennt);
        let (stopp_tx, stopp_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = VerbindungsTask {
            konfig,
            geteilt: Arc::clone(&geteilt),
            status_tx,
            events: event_tx,
        };
        let task = tokio::spawn(task.ausfuehren(stopp_rx));

        (
            Self {
                geteilt,
                status_rx,
                stopp_tx,
                task,
            },
            event_rx,
        )
    }

    /// Signiert `content` und reiht die Nachricht ein
    ///
    /// Kehrt sofort zurueck. Liefert die Signatur, unter der spaeter
    /// `Zugestellt` oder `RateLimitiert` gemeldet wird.
    pub fn senden(&self, content: impl Into<String>) -> ClientResult<String> {
        let content = content.into();
        if content.is_empty() {
            return Err(ClientError::UngueltigeNachricht("Inhalt ist leer".into()));
        }
        if self.task.is_finished() {
            return Err(ClientError::Beendet);
        }

        let identity = &self.geteilt.identity;
        let timestamp = zeitstempel_jetzt();
        let signatur = nachricht_signieren(identity, &content, timestamp);
        let daten =
            LobbyMessageData::signiert(content, &identity.public_key(), &signatur, &timestamp);

        self.geteilt.queue.lock().einreihen(daten)?;
        self.geteilt.senden_signal.notify_one();
        Ok(signatur.to_hex())
    }

    pub fn status(&self) -> VerbindungsStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_abonnieren(&self) -> watch::Receiver<VerbindungsStatus> {
        self.status_rx.clone()
    }

    /// Kopie der aktuellen Online-Liste
    pub fn lobby(&self) -> LobbyAnsicht {
        self.geteilt.lobby.lock().clone()
    }

    /// Anzahl unbestaetigter Nachrichten
    pub fn ausstehend(&self) -> usize {
        self.geteilt.queue.lock().len()
    }

    pub fn public_key(&self) -> PublicKey {
        self.geteilt.identity.public_key()
    }

    /// Meldet sich ab und wartet auf das Ende der Task
    pub async fn beenden(self) {
        let _ = self.stopp_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Verbindungs-Task endete fehlerhaft: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Hintergrund-Task
// ---------------------------------------------------------------------------

enum SitzungsEnde {
    Beendet,
    Ersetzt,
    Getrennt(String),
}

struct VerbindungsTask {
    konfig: ClientKonfig,
    geteilt: Arc<Geteilt>,
    status_tx: watch::Sender<VerbindungsStatus>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl VerbindungsTask {
    async fn ausfuehren(self, mut stopp_rx: watch::Receiver<bool>) {
        let mut backoff = Backoff::neu(self.konfig.backoff.clone());

        loop {
            let anmeldung = tokio::select! {
                ergebnis = self.verbinden_und_anmelden() => ergebnis,
                _ = stopp_abwarten(&mut stopp_rx) => break,
            };

            let ende = match anmeldung {
                Ok((verbindung, antwort)) => {
                    backoff.zuruecksetzen();
                    self.sitzung(verbindung, antwort, &mut stopp_rx).await
                }
                Err(e) => {
                    let fehler = LobbyError::from(e);
                    if !fehler.ist_wiederholbar() {
                        tracing::error!("Anmeldung fehlgeschlagen: {fehler}");
                    }
                    SitzungsEnde::Getrennt(fehler.to_string())
                }
            };
            self.lobby_leeren();

            match ende {
                SitzungsEnde::Beendet => break,
                SitzungsEnde::Ersetzt => {
                    tracing::warn!("Identitaet an anderer Stelle angemeldet, keine Wiederverbindung");
                    self.event(ClientEvent::Ersetzt);
                    break;
                }
                SitzungsEnde::Getrennt(grund) => {
                    tracing::warn!(grund = %grund, "Verbindung verloren");
                    self.event(ClientEvent::Getrennt { grund });
                }
            }

            let Some(wartezeit) = backoff.naechste_wartezeit() else {
                tracing::error!(
                    versuche = backoff.versuch(),
                    "Maximale Anzahl Verbindungsversuche erreicht"
                );
                break;
            };
            self.status(VerbindungsStatus::Wiederverbindend {
                versuch: backoff.versuch(),
            });
            tracing::info!(
                versuch = backoff.versuch(),
                warten_ms = wartezeit.as_millis() as u64,
                "Wiederverbindung geplant"
            );

            tokio::select! {
                _ = tokio::time::sleep(wartezeit) => {}
                _ = stopp_abwarten(&mut stopp_rx) => break,
            }
        }

        self.status(VerbindungsStatus::Getrennt);
        tracing::debug!("Verbindungs-Task beendet");
    }

    async fn verbinden_und_anmelden(&self) -> ClientResult<(ServerConnection, AuthResponse)> {
        self.status(VerbindungsStatus::Verbindend);
        let mut verbindung = ServerConnection::verbinden(
            &self.konfig.server_adresse,
            self.konfig.verbindungs_zeitlimit,
        )
        .await?;

        self.status(VerbindungsStatus::Authentifizierend);
        let antwort = verbindung
            .authentifizieren(
                &self.geteilt.identity,
                self.konfig.profile_name.as_deref(),
                self.konfig.verbindungs_zeitlimit,
            )
            .await?;
        Ok((verbindung, antwort))
    }

    /// Laeuft bis Transportverlust, `server_restart`, Ersetzung oder Stopp
    async fn sitzung(
        &self,
        mut verbindung: ServerConnection,
        antwort: AuthResponse,
        stopp_rx: &mut watch::Receiver<bool>,
    ) -> SitzungsEnde {
        self.geteilt.lobby.lock().snapshot_anwenden(&antwort.online_users);
        self.status(VerbindungsStatus::Verbunden);
        tracing::info!(
            session = ?antwort.session_id,
            online = antwort.online_count,
            ausstehend = self.geteilt.queue.lock().len(),
            "Mit Lobby verbunden"
        );
        self.event(ClientEvent::Verbunden {
            session_id: antwort.session_id,
            online_count: antwort.online_count,
        });
        self.anwesenheit_melden();

        // Alles Unbestaetigte in Einreihungs-Reihenfolge erneut senden
        self.geteilt.queue.lock().als_ungesendet_markieren();
        let mut letzter_empfang = Instant::now();

        loop {
            let (naechste, pause) = {
                let mut queue = self.geteilt.queue.lock();
                let naechste = queue.naechste_zum_senden(std::time::Instant::now());
                (naechste, queue.pause_ende().map(Instant::from_std))
            };
            if let Some(daten) = naechste {
                if let Err(e) = verbindung
                    .senden(WireMessage::neu(Payload::LobbyMessage(daten)))
                    .await
                {
                    return SitzungsEnde::Getrennt(e.to_string());
                }
            }

            let frist = letzter_empfang + self.konfig.empfangs_zeitlimit;
            tokio::select! {
                _ = self.geteilt.senden_signal.notified() => {}

                _ = pause_abwarten(pause) => {}

                empfangen = verbindung.naechste() => match empfangen {
                    Ok(Ok(nachricht)) => {
                        letzter_empfang = Instant::now();
                        if let Some(ende) = self.verarbeiten(nachricht.payload, &mut verbindung).await {
                            return ende;
                        }
                    }
                    Ok(Err(ungueltig)) => {
                        letzter_empfang = Instant::now();
                        tracing::warn!(grund = %ungueltig.grund, "Ungueltiger Frame vom Server");
                    }
                    Err(e) => return SitzungsEnde::Getrennt(e.to_string()),
                },

                _ = tokio::time::sleep_until(frist) => {
                    return SitzungsEnde::Getrennt("Keine Daten vom Server".into());
                }

                _ = stopp_abwarten(stopp_rx) => {
                    if let Err(e) = verbindung.abmelden(None).await {
                        tracing::debug!("Logout nicht gesendet: {e}");
                    }
                    return SitzungsEnde::Beendet;
                }
            }
        }
    }

    async fn verarbeiten(
        &self,
        payload: Payload,
        verbindung: &mut ServerConnection,
    ) -> Option<SitzungsEnde> {
        match payload {
            Payload::Ping(ping) => {
                if let Err(e) = verbindung.senden(WireMessage::pong(ping.timestamp_ms)).await {
                    return Some(SitzungsEnde::Getrennt(e.to_string()));
                }
            }
            Payload::LobbyMessage(daten) => match nachricht_pruefen(&daten) {
                Ok(nachricht) => {
                    tracing::debug!(
                        sender = %nachricht.sender_public_key.kurz(),
                        sequence = %nachricht.sequence_id,
                        "Nachricht verifiziert"
                    );
                    self.event(ClientEvent::NachrichtVerifiziert(nachricht));
                }
                Err(grund) => {
                    tracing::warn!(grund = %grund, "Empfangene Nachricht nicht verifizierbar");
                    self.event(ClientEvent::NachrichtAbgelehnt { grund, daten });
                }
            },
            Payload::VerificationStatus(status) => self.bestaetigung(status),
            Payload::UserJoined(update) => {
                self.geteilt.lobby.lock().beigetreten(&update);
                self.event(ClientEvent::Beigetreten(update));
                self.anwesenheit_melden();
            }
            Payload::UserLeft(update) => {
                self.geteilt.lobby.lock().verlassen(&update);
                self.event(ClientEvent::Verlassen(update));
                self.anwesenheit_melden();
            }
            Payload::PresenceSnapshot(snapshot) => {
                self.geteilt.lobby.lock().snapshot(&snapshot);
                self.anwesenheit_melden();
            }
            Payload::ServerRestart(neustart) => {
                tracing::info!(grund = ?neustart.reason, "Server startet neu");
                self.event(ClientEvent::ServerNeustart {
                    grund: neustart.reason,
                });
                return Some(SitzungsEnde::Getrennt("server_restart".into()));
            }
            Payload::Error(fehler) if fehler.code == ErrorCode::Superseded => {
                return Some(SitzungsEnde::Ersetzt);
            }
            Payload::Error(fehler) => {
                tracing::warn!(code = ?fehler.code, "Server meldet Fehler: {}", fehler.message);
                self.event(ClientEvent::ServerFehler {
                    code: fehler.code,
                    message: fehler.message,
                });
            }
            Payload::Pong(_) => {}
            andere => tracing::debug!(typ = andere.typ(), "Frame ignoriert"),
        }
        None
    }

    /// `verification_status` entfernt den Queue-Eintrag; nur `RATE_LIMITED`
    /// stellt ihn bis `retry_after_ms` zurueck
    fn bestaetigung(&self, status: VerificationStatus) {
        if let (Verifikation::Rejected, Some(Ablehnungsgrund::RateLimited)) =
            (status.status, status.error_kind)
        {
            let warten = status
                .retry_after_ms
                .map(Duration::from_millis)
                .unwrap_or(RATE_LIMIT_STANDARD_PAUSE)
                .max(RATE_LIMIT_MIN_PAUSE);
            let zurueckgestellt = status.signature.as_deref().is_some_and(|sig| {
                self.geteilt
                    .queue
                    .lock()
                    .zurueckstellen(sig, std::time::Instant::now() + warten)
            });
            tracing::warn!(
                warten_ms = warten.as_millis() as u64,
                zurueckgestellt,
                "Nachricht wegen Rate-Limit zurueckgestellt"
            );
            self.event(ClientEvent::RateLimitiert {
                signatur: status.signature,
                retry_after: status.retry_after_ms.map(Duration::from_millis),
            });
            return;
        }

        let eintrag = status
            .signature
            .as_deref()
            .and_then(|sig| self.geteilt.queue.lock().bestaetigen(sig));
        if eintrag.is_none() {
            tracing::debug!(signatur = ?status.signature, "Bestaetigung ohne Queue-Eintrag");
        }

        match status.status {
            Verifikation::Accepted => self.event(ClientEvent::Zugestellt {
                signatur: status.signature,
                sequence_id: status.sequence_id,
                duplikat: status.duplicate,
            }),
            Verifikation::Rejected => {
                tracing::warn!(grund = ?status.error_kind, detail = ?status.reason, "Nachricht vom Server abgelehnt");
                self.event(ClientEvent::SendenAbgelehnt {
                    signatur: status.signature,
                    grund: status.error_kind,
                    detail: status.reason,
                });
            }
        }
    }

    fn status(&self, status: VerbindungsStatus) {
        self.status_tx.send_replace(status);
    }

    fn event(&self, event: ClientEvent) {
        // Anwendung hat den Empfaenger verworfen
        let _ = self.events.send(event);
    }

    fn anwesenheit_melden(&self) {
        let (online_count, anzeige) = {
            let lobby = self.geteilt.lobby.lock();
            (lobby.anzahl(), lobby.anzeige())
        };
        self.event(ClientEvent::Anwesenheit {
            online_count,
            anzeige,
        });
    }

    fn lobby_leeren(&self) {
        self.geteilt.lobby.lock().leeren();
    }
}

/// Wartet auf das Ende einer Rate-Limit-Pause, ohne Pause nie
async fn pause_abwarten(bis: Option<Instant>) {
    match bis {
        Some(bis) => tokio::time::sleep_until(bis).await,
        None => std::future::pending().await,
    }
}

/// Kehrt zurueck sobald Stopp gesetzt oder das Handle verworfen wurde
async fn stopp_abwarten(stopp_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stopp_rx.borrow_and_update() {
            return;
        }
        if stopp_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn konfig_ohne_server() -> ClientKonfig {
        let mut konfig = ClientKonfig::neu("127.0.0.1:1");
        konfig.queue_kapazitaet = 2;
        konfig.verbindungs_zeitlimit = Duration::from_millis(200);
        konfig.backoff = BackoffKonfig {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(50),
            faktor: 2.0,
            max_versuche: 0,
        };
        konfig
    }

    #[tokio::test]
    async fn senden_ohne_verbindung_fuellt_queue() {
        let (client, _events) =
            LobbyClient::starten(konfig_ohne_server(), Identity::from_bytes(&[5; 32]));

        let sig = client.senden("eins").unwrap();
        assert!(sig.starts_with("0x"));
        client.senden("zwei").unwrap();
        assert_eq!(client.ausstehend(), 2);

        let fehler = client.senden("drei").unwrap_err();
        assert!(matches!(fehler, ClientError::QueueFull { kapazitaet: 2 }));
        assert_eq!(client.ausstehend(), 2);

        client.beenden().await;
    }

    #[tokio::test]
    async fn leerer_inhalt_wird_abgelehnt() {
        let (client, _events) =
            LobbyClient::starten(konfig_ohne_server(), Identity::from_bytes(&[5; 32]));
        assert!(matches!(
            client.senden(""),
            Err(ClientError::UngueltigeNachricht(_))
        ));
        assert_eq!(client.ausstehend(), 0);
        client.beenden().await;
    }

    #[tokio::test]
    async fn fehlgeschlagene_verbindung_fuehrt_zu_wiederverbindung() {
        let (client, mut events) =
            LobbyClient::starten(konfig_ohne_server(), Identity::from_bytes(&[5; 32]));
        let mut status = client.status_abonnieren();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let VerbindungsStatus::Wiederverbindend { versuch } = *status.borrow_and_update() {
                    if versuch >= 2 {
                        break;
                    }
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("kein zweiter Wiederverbindungsversuch");

        let event = events.recv().await.unwrap();
        assert!(matches!(event, ClientEvent::Getrennt { .. }));

        client.beenden().await;
    }

    #[tokio::test]
    async fn max_versuche_beendet_die_task() {
        let mut konfig = konfig_ohne_server();
        konfig.backoff.max_versuche = 1;
        let (client, _events) = LobbyClient::starten(konfig, Identity::from_bytes(&[5; 32]));
        let mut status = client.status_abonnieren();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !client.task.is_finished() {
                let _ = tokio::time::timeout(Duration::from_millis(20), status.changed()).await;
            }
        })
        .await
        .expect("Task laeuft trotz max_versuche weiter");

        assert_eq!(client.status(), VerbindungsStatus::Getrennt);
        assert!(matches!(client.senden("x"), Err(ClientError::Beendet)));
    }
}
