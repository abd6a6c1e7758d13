//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services und Zustands-Manager, die sicher zwischen
//! tokio-Tasks geteilt werden koennen. Der Zustand wird beim Start einmal
//! erzeugt und als `Arc<LobbyState>` an jede Verbindung gegeben.

use lobbykey_observability::LobbyMetrics;
use lobbykey_protocol::message::{PresenceSnapshot, PresenceUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::EventBroadcaster;
use crate::message_bus::MessageBus;
use crate::presence::{PresenceEntry, PresenceRegistry};
use crate::profile::ProfileStore;
use crate::rate_limit::RateLimitKonfig;
use crate::session::SessionManager;

/// Verhalten bei erneuter Anmeldung einer bereits verbundenen Identitaet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoppelLoginPolitik {
    /// Neue Session ersetzt die alte, die alte wird getrennt
    #[default]
    Supersede,
    /// Neue Anmeldung wird abgelehnt
    Reject,
}

/// Konfiguration fuer den Lobby-Service
#[derive(Debug, Clone)]
pub struct LobbyKonfig {
    /// Anzeigename des Servers (in `auth_challenge`)
    pub server_name: String,
    /// Maximale gleichzeitige Sessions
    pub max_clients: usize,
    /// Zeit fuer die Antwort auf eine Challenge
    pub handshake_timeout: Duration,
    /// Server-Ping-Intervall
    pub keepalive_intervall: Duration,
    /// Ohne eingehenden Frame wird die Verbindung danach getrennt
    pub verbindungs_timeout: Duration,
    pub rate_limit: RateLimitKonfig,
    pub dedup_aufbewahrung: Duration,
    /// Wie lange ein Offline-Eintrag in der Presence-Registry bleibt
    pub offline_aufbewahrung: Duration,
    /// Maximale Inhaltslaenge in Zeichen
    pub max_inhalt_laenge: usize,
    pub max_frame_groesse: usize,
    /// Ausgehende Queue pro Session
    pub send_queue_groesse: usize,
    pub doppel_login: DoppelLoginPolitik,
}

impl Default for LobbyKonfig {
    fn default() -> Self {
        Self {
            server_name: "Lobbykey".to_string(),
            max_clients: 512,
            handshake_timeout: Duration::from_secs(10),
            keepalive_intervall: Duration::from_secs(30),
            verbindungs_timeout: Duration::from_secs(90),
            rate_limit: RateLimitKonfig::default(),
            dedup_aufbewahrung: Duration::from_secs(300),
            offline_aufbewahrung: Duration::from_secs(3600),
            max_inhalt_laenge: 2000,
            max_frame_groesse: lobbykey_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            send_queue_groesse: 64,
            doppel_login: DoppelLoginPolitik::Supersede,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct LobbyState {
    pub config: Arc<LobbyKonfig>,
    /// Authentifizierte Sessions
    pub sessions: SessionManager,
    /// Wer ist online
    pub presence: PresenceRegistry,
    /// Ausgehende Queues aller Sessions
    pub broadcaster: EventBroadcaster,
    /// Pruefung und Verteilung von Lobby-Nachrichten
    pub message_bus: MessageBus,
    /// Profilnamen
    pub profile: Arc<dyn ProfileStore>,
    pub metriken: LobbyMetrics,
}

impl LobbyState {
    /// Erstellt einen neuen LobbyState
    pub fn neu(
        config: LobbyKonfig,
        profile: Arc<dyn ProfileStore>,
        metriken: LobbyMetrics,
    ) -> Arc<Self> {
        let broadcaster = EventBroadcaster::neu(config.send_queue_groesse);
        let message_bus = MessageBus::neu(&config, broadcaster.clone(), metriken.clone());
        Arc::new(Self {
            config: Arc::new(config),
            sessions: SessionManager::neu(),
            presence: PresenceRegistry::neu(),
            broadcaster,
            message_bus,
            profile,
            metriken,
        })
    }

    /// Aktuelle Online-Liste fuer `presence_snapshot` und `auth_response`
    pub fn presence_snapshot(&self) -> PresenceSnapshot {
        let users: Vec<PresenceUser> = self
            .presence
            .online_users()
            .into_iter()
            .map(presence_user)
            .collect();
        PresenceSnapshot {
            online_count: users.len(),
            users,
        }
    }
}

fn presence_user(eintrag: PresenceEntry) -> PresenceUser {
    PresenceUser {
        public_key: eintrag.public_key,
        profile_name: eintrag.profile_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InMemoryProfile;
    use lobbykey_core::{PublicKey, SessionId};

    #[test]
    fn snapshot_ist_sortiert_und_gezaehlt() {
        let state = LobbyState::neu(
            LobbyKonfig::default(),
            Arc::new(InMemoryProfile::neu()),
            LobbyMetrics::neu().unwrap(),
        );
        for b in [0x22u8, 0x11] {
            state
                .presence
                .beitreten(
                    PublicKey::from_bytes([b; 32]),
                    None,
                    SessionId::new(),
                    DoppelLoginPolitik::Supersede,
                )
                .unwrap();
        }

        let snapshot = state.presence_snapshot();
        assert_eq!(snapshot.online_count, 2);
        assert_eq!(snapshot.users[0].public_key, PublicKey::from_bytes([0x11; 32]));
    }

    #[test]
    fn doppel_login_politik_aus_text() {
        #[derive(Deserialize)]
        struct W {
            p: DoppelLoginPolitik,
        }
        let w: W = serde_json::from_str(r#"{"p":"reject"}"#).unwrap();
        assert_eq!(w.p, DoppelLoginPolitik::Reject);
        assert_eq!(DoppelLoginPolitik::default(), DoppelLoginPolitik::Supersede);
    }
}
