//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer `ClientConnection`.
//! Alle Tasks laufen in einem `JoinSet`; beim Shutdown wird auf ihr Ende
//! gewartet, damit jede Session `server_restart` erhaelt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::connection::ClientConnection;
use crate::presence::presence_pflegen;
use crate::server_state::LobbyState;

/// Wartezeit auf laufende Verbindungen beim Herunterfahren
const SHUTDOWN_FRIST: Duration = Duration::from_secs(5);

/// TCP-Signaling-Server
pub struct SignalingServer {
    state: Arc<LobbyState>,
    listener: TcpListener,
}

impl SignalingServer {
    /// Bindet den Socket
    ///
    /// Port 0 waehlt einen freien Port; die tatsaechliche Adresse liefert
    /// `lokale_adresse`.
    pub async fn binden(state: Arc<LobbyState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Signaling-Server gestartet");

        let pflege = tokio::spawn(presence_pflegen(
            self.state.presence.clone(),
            self.state.presence.events_abonnieren(),
            self.state.metriken.clone(),
            self.state.config.offline_aufbewahrung,
            shutdown_rx.clone(),
        ));

        let mut verbindungen = JoinSet::new();

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let verbindung = ClientConnection::neu(Arc::clone(&self.state), peer_addr);
                            let shutdown_rx_clone = shutdown_rx.clone();
                            verbindungen.spawn(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                // Beendete Verbindungs-Tasks einsammeln
                Some(ergebnis) = verbindungen.join_next(), if !verbindungen.is_empty() => {
                    if let Err(e) = ergebnis {
                        if e.is_panic() {
                            tracing::error!(fehler = %e, "Verbindungs-Task abgestuerzt");
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        // Verbindungen haben das Signal ebenfalls erhalten und senden server_restart
        let offen = verbindungen.len();
        let beendet = tokio::time::timeout(SHUTDOWN_FRIST, async {
            while verbindungen.join_next().await.is_some() {}
        })
        .await;
        if beendet.is_err() {
            tracing::warn!(offen, "Verbindungen nach Frist abgebrochen");
            verbindungen.abort_all();
        }

        if let Err(e) = pflege.await {
            tracing::warn!(fehler = %e, "Presence-Pflege abgebrochen");
        }

        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }
}
