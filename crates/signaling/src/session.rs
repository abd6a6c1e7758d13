//! Session-Verwaltung
//!
//! Eine Session entsteht nach erfolgreichem Handshake und endet beim
//! Verbindungsabbau oder Logout. Der `SessionManager` ist der einzige
//! Besitzer der Sessions; andere Komponenten halten nur die `SessionId`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lobbykey_core::{PublicKey, SessionId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Trenngrund
// ---------------------------------------------------------------------------

/// Grund, aus dem eine Session von aussen beendet wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrennGrund {
    /// Dieselbe Identitaet hat sich erneut angemeldet
    Ersetzt,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    id: SessionId,
    public_key: PublicKey,
    peer_addr: SocketAddr,
    authenticated_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    trennen_tx: watch::Sender<Option<TrennGrund>>,
}

/// Momentaufnahme einer Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub public_key: PublicKey,
    pub peer_addr: SocketAddr,
    pub authenticated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            public_key: s.public_key,
            peer_addr: s.peer_addr,
            authenticated_at: s.authenticated_at,
            last_seen_at: s.last_seen_at,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Verwaltet alle authentifizierten Sessions
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<DashMap<SessionId, Session>>,
}

impl SessionManager {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt eine neue Session an
    ///
    /// Der zurueckgegebene Receiver meldet, wenn die Session von aussen
    /// beendet werden soll.
    pub fn erstellen(
        &self,
        public_key: PublicKey,
        peer_addr: SocketAddr,
    ) -> (SessionId, watch::Receiver<Option<TrennGrund>>) {
        let id = SessionId::new();
        let jetzt = Utc::now();
        let (trennen_tx, trennen_rx) = watch::channel(None);
        self.sessions.insert(
            id,
            Session {
                id,
                public_key,
                peer_addr,
                authenticated_at: jetzt,
                last_seen_at: jetzt,
                trennen_tx,
            },
        );
        tracing::debug!(session = %id, public_key = %public_key.kurz(), "Session erstellt");
        (id, trennen_rx)
    }

    /// Entfernt eine Session
    pub fn entfernen(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions
            .remove(id)
            .map(|(_, session)| SessionInfo::from(&session))
    }

    /// Aktualisiert `last_seen_at`
    pub fn aktivitaet(&self, id: &SessionId) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_seen_at = Utc::now();
        }
    }

    /// Fordert die Verbindung einer Session auf, sich zu beenden
    ///
    /// Gibt `false` zurueck, wenn die Session nicht (mehr) existiert.
    pub fn trennen(&self, id: &SessionId, grund: TrennGrund) -> bool {
        match self.sessions.get(id) {
            Some(session) => {
                session.trennen_tx.send_replace(Some(grund));
                true
            }
            None => false,
        }
    }

    pub fn info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).map(|s| SessionInfo::from(s.value()))
    }

    pub fn anzahl(&self) -> usize {
        self.sessions.len()
    }
}
