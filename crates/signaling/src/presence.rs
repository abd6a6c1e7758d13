//! Presence-Registry – Wer ist online?
//!
//! Haelt den autoritativen Online-Zustand aller Identitaeten und
//! benachrichtigt Subscriber bei Aenderungen (Join/Leave/Ersetzt).
//!
//! Eintraege werden beim Verlassen nicht geloescht, sondern auf
//! `Offline` gesetzt. Die sichtbare Online-Menge enthaelt nur Eintraege
//! mit Status `Online`. Offline-Eintraege bleiben hoechstens
//! `offline_aufbewahrung` erhalten; `presence_pflegen` entfernt aeltere
//! periodisch, damit die Registry nicht mit jedem je gesehenen Schluessel
//! waechst.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lobbykey_core::{PublicKey, SessionId};
use lobbykey_observability::LobbyMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;

use crate::server_state::DoppelLoginPolitik;

// ---------------------------------------------------------------------------
// Presence-Events
// ---------------------------------------------------------------------------

/// Events die die PresenceRegistry versendet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Identitaet ist online gegangen
    Beigetreten {
        public_key: PublicKey,
        online_count: usize,
    },
    /// Identitaet ist offline gegangen
    Verlassen {
        public_key: PublicKey,
        online_count: usize,
    },
    /// Eine bestehende Session wurde durch eine neue ersetzt
    Ersetzt {
        public_key: PublicKey,
        alte_session: SessionId,
    },
}

// ---------------------------------------------------------------------------
// PresenceEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Presence-Info einer Identitaet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub public_key: PublicKey,
    pub profile_name: Option<String>,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
    /// Index auf die besitzende Session
    pub session_id: SessionId,
}

/// Ergebnis von `beitreten`
#[derive(Debug, Clone)]
pub struct JoinErgebnis {
    pub eintrag: PresenceEntry,
    /// Session, die durch diesen Beitritt verdraengt wurde
    pub ersetzt: Option<SessionId>,
    pub online_count: usize,
}

/// Ergebnis von `verlassen`
#[derive(Debug, Clone)]
pub struct AustrittErgebnis {
    pub eintrag: PresenceEntry,
    pub online_count: usize,
}

/// Beitritt abgelehnt, weil die Identitaet bereits online ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Identitaet ist bereits online")]
pub struct BereitsOnline;

// ---------------------------------------------------------------------------
// PresenceRegistry
// ---------------------------------------------------------------------------

/// Groesse des Broadcast-Kanals fuer Presence-Events
const EVENT_KANAL_GROESSE: usize = 256;

/// Verwaltet den Online-Status aller Identitaeten
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<PresenceRegistryInner>,
}

struct PresenceRegistryInner {
    eintraege: DashMap<PublicKey, PresenceEntry>,
    /// Anzahl der Eintraege mit Status `Online`
    online: AtomicUsize,
    event_tx: broadcast::Sender<PresenceEvent>,
}

impl PresenceRegistry {
    pub fn neu() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(PresenceRegistryInner {
                eintraege: DashMap::new(),
                online: AtomicUsize::new(0),
                event_tx,
            }),
        }
    }

    /// Meldet eine Identitaet als online
    ///
    /// Ist die Identitaet bereits online, entscheidet `politik`: bei
    /// `Supersede` wird die alte Session in `ersetzt` gemeldet und muss vom
    /// Aufrufer getrennt werden, bei `Reject` schlaegt der Beitritt fehl.
    pub fn beitreten(
        &self,
        public_key: PublicKey,
        profile_name: Option<String>,
        session_id: SessionId,
        politik: DoppelLoginPolitik,
    ) -> Result<JoinErgebnis, BereitsOnline> {
        let jetzt = Utc::now();
        let mut ersetzt = None;

        // Der Eintrag bleibt waehrend der Aenderung gesperrt
        let (eintrag, online_count) = match self.inner.eintraege.entry(public_key) {
            Entry::Occupied(mut belegt) => {
                let eintrag = belegt.get_mut();
                let online_count = if eintrag.status == PresenceStatus::Online {
                    if politik == DoppelLoginPolitik::Reject {
                        return Err(BereitsOnline);
                    }
                    ersetzt = Some(eintrag.session_id);
                    self.inner.online.load(Ordering::SeqCst)
                } else {
                    self.inner.online.fetch_add(1, Ordering::SeqCst) + 1
                };
                eintrag.profile_name = profile_name;
                eintrag.status = PresenceStatus::Online;
                eintrag.last_seen = jetzt;
                eintrag.session_id = session_id;
                (eintrag.clone(), online_count)
            }
            Entry::Vacant(frei) => {
                let online_count = self.inner.online.fetch_add(1, Ordering::SeqCst) + 1;
                let eintrag = PresenceEntry {
                    public_key,
                    profile_name,
                    status: PresenceStatus::Online,
                    last_seen: jetzt,
                    session_id,
                };
                frei.insert(eintrag.clone());
                (eintrag, online_count)
            }
        };

        match ersetzt {
            Some(alte_session) => {
                tracing::info!(
                    public_key = %public_key.kurz(),
                    alte_session = %alte_session,
                    neue_session = %session_id,
                    "Session ersetzt"
                );
                let _ = self.inner.event_tx.send(PresenceEvent::Ersetzt {
                    public_key,
                    alte_session,
                });
            }
            None => {
                tracing::info!(
                    public_key = %public_key.kurz(),
                    online = online_count,
                    "Identitaet online"
                );
                let _ = self.inner.event_tx.send(PresenceEvent::Beigetreten {
                    public_key,
                    online_count,
                });
            }
        }

        Ok(JoinErgebnis {
            eintrag,
            ersetzt,
            online_count,
        })
    }

    /// Meldet eine Identitaet als offline
    ///
    /// Wirkt nur, wenn `session_id` noch die indizierte Session ist. Der
    /// Abbau einer ersetzten Session entfernt so nicht ihren Nachfolger.
    pub fn verlassen(
        &self,
        public_key: &PublicKey,
        session_id: &SessionId,
    ) -> Option<AustrittErgebnis> {
        let (eintrag, online_count) = {
            let mut eintrag = self.inner.eintraege.get_mut(public_key)?;
            if eintrag.session_id != *session_id || eintrag.status != PresenceStatus::Online {
                return None;
            }
            eintrag.status = PresenceStatus::Offline;
            eintrag.last_seen = Utc::now();
            let online_count = self
                .inner
                .online
                .fetch_sub(1, Ordering::SeqCst)
                .saturating_sub(1);
            (eintrag.clone(), online_count)
        };

        tracing::info!(
            public_key = %public_key.kurz(),
            online = online_count,
            "Identitaet offline"
        );
        let _ = self.inner.event_tx.send(PresenceEvent::Verlassen {
            public_key: *public_key,
            online_count,
        });

        Some(AustrittErgebnis {
            eintrag,
            online_count,
        })
    }

    /// Alle Online-Eintraege, aufsteigend nach PublicKey-Bytes
    pub fn online_users(&self) -> Vec<PresenceEntry> {
        let mut liste: Vec<PresenceEntry> = self
            .inner
            .eintraege
            .iter()
            .filter(|e| e.status == PresenceStatus::Online)
            .map(|e| e.value().clone())
            .collect();
        liste.sort_by(|a, b| a.public_key.cmp(&b.public_key));
        liste
    }

    /// Groesse der Online-Menge
    pub fn count(&self) -> usize {
        self.inner.online.load(Ordering::SeqCst)
    }

    pub fn ist_online(&self, public_key: &PublicKey) -> bool {
        self.inner
            .eintraege
            .get(public_key)
            .map(|e| e.status == PresenceStatus::Online)
            .unwrap_or(false)
    }

    /// Letzter bekannter Eintrag einer Identitaet (auch offline)
    pub fn eintrag(&self, public_key: &PublicKey) -> Option<PresenceEntry> {
        self.inner.eintraege.get(public_key).map(|e| e.value().clone())
    }

    /// Abonniert Presence-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<PresenceEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Entfernt Offline-Eintraege, deren `last_seen` aelter als
    /// `aufbewahrung` ist; liefert die Anzahl entfernter Eintraege
    pub fn offline_bereinigen(&self, aufbewahrung: Duration) -> usize {
        let Ok(aufbewahrung) = chrono::Duration::from_std(aufbewahrung) else {
            return 0;
        };
        let grenze = Utc::now() - aufbewahrung;
        let vorher = self.inner.eintraege.len();
        self.inner
            .eintraege
            .retain(|_, e| e.status == PresenceStatus::Online || e.last_seen >= grenze);
        vorher.saturating_sub(self.inner.eintraege.len())
    }

    /// Anzahl aller Eintraege, online und offline
    pub fn eintrag_anzahl(&self) -> usize {
        self.inner.eintraege.len()
    }
}

// ---------------------------------------------------------------------------
// Pflege-Task
// ---------------------------------------------------------------------------

/// Abstand der Offline-Bereinigung
const BEREINIGUNG_INTERVALL: Duration = Duration::from_secs(60);

/// Spiegelt Presence-Events in die Metriken und bereinigt periodisch
/// abgelaufene Offline-Eintraege, bis `shutdown_rx` `true` meldet
pub async fn presence_pflegen(
    registry: PresenceRegistry,
    mut events: broadcast::Receiver<PresenceEvent>,
    metriken: LobbyMetrics,
    offline_aufbewahrung: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let takt = BEREINIGUNG_INTERVALL.min(offline_aufbewahrung.max(Duration::from_secs(1)));
    let mut bereinigung = tokio::time::interval(takt);
    bereinigung.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let label = match event {
                        PresenceEvent::Beigetreten { .. } => "joined",
                        PresenceEvent::Verlassen { .. } => "left",
                        PresenceEvent::Ersetzt { .. } => "superseded",
                    };
                    metriken.presence(label);
                    metriken.sessions_online.set(registry.count() as i64);
                }
                Err(RecvError::Lagged(verpasst)) => {
                    tracing::warn!(verpasst, "Presence-Events fuer Metriken verpasst");
                    metriken.sessions_online.set(registry.count() as i64);
                }
                Err(RecvError::Closed) => break,
            },

            _ = bereinigung.tick() => {
                let entfernt = registry.offline_bereinigen(offline_aufbewahrung);
                if entfernt > 0 {
                    tracing::debug!(
                        entfernt,
                        verbleibend = registry.eintrag_anzahl(),
                        "Offline-Eintraege bereinigt"
                    );
                }
            }

            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
