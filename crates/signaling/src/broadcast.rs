//! Event-Broadcaster – Sendet Frames an verbundene Sessions
//!
//! Der EventBroadcaster verwaltet die ausgehenden Queues aller
//! authentifizierten Sessions. Zustellung ist nicht-blockierend: ist die
//! Queue eines Empfaengers voll oder geschlossen, wird nur die Zustellung
//! an diesen Empfaenger verworfen.
//!
//! ## Selektives Broadcasting
//! - An alle Sessions: `an_alle_senden`
//! - An alle ausser einer: `an_alle_ausser_senden`

use dashmap::DashMap;
use lobbykey_core::SessionId;
use lobbykey_protocol::WireMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Session
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub session_id: SessionId,
    pub tx: mpsc::Sender<WireMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: WireMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session = %self.session_id, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session = %self.session_id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

/// Ergebnis einer Verteilung an mehrere Sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verteilung {
    pub gesendet: usize,
    pub verworfen: usize,
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Zentraler Broadcaster fuer alle authentifizierten Sessions
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    clients: DashMap<SessionId, ClientSender>,
    queue_groesse: usize,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster mit der angegebenen Queue-Groesse pro Session
    pub fn neu(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                clients: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine Session und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die Verbindung liest aus dieser Queue und sendet via TCP.
    pub fn client_registrieren(&self, session_id: SessionId) -> mpsc::Receiver<WireMessage> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        self.inner
            .clients
            .insert(session_id, ClientSender { session_id, tx });
        tracing::debug!(session = %session_id, "Session im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Session aus dem Broadcaster
    pub fn client_entfernen(&self, session_id: &SessionId) {
        if self.inner.clients.remove(session_id).is_some() {
            tracing::debug!(session = %session_id, "Session aus Broadcaster entfernt");
        }
    }

    /// Sendet eine Nachricht an alle registrierten Sessions
    pub fn an_alle_senden(&self, nachricht: WireMessage) -> Verteilung {
        self.verteilen(None, nachricht)
    }

    /// Sendet eine Nachricht an alle Sessions ausser einer
    pub fn an_alle_ausser_senden(
        &self,
        ausgeschlossen: &SessionId,
        nachricht: WireMessage,
    ) -> Verteilung {
        self.verteilen(Some(ausgeschlossen), nachricht)
    }

    fn verteilen(&self, ausgeschlossen: Option<&SessionId>, nachricht: WireMessage) -> Verteilung {
        let empfaenger: Vec<ClientSender> = self
            .inner
            .clients
            .iter()
            .filter(|e| Some(e.key()) != ausgeschlossen)
            .map(|e| e.value().clone())
            .collect();

        let mut verteilung = Verteilung::default();
        for sender in empfaenger {
            if sender.senden(nachricht.clone()) {
                verteilung.gesendet += 1;
            } else {
                verteilung.verworfen += 1;
            }
        }
        verteilung
    }

    /// Gibt die Anzahl der registrierten Sessions zurueck
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Prueft ob eine Session registriert ist
    pub fn ist_registriert(&self, session_id: &SessionId) -> bool {
        self.inner.clients.contains_key(session_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
