//! lobbykey-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Profilspeicher, Metriken, Lobby-Zustand,
//! TCP-Server und Observability-Server.

pub mod config;

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use config::ServerConfig;
use lobbykey_observability::{observability_server_starten, HealthState, LobbyMetrics};
use lobbykey_signaling::{InMemoryProfile, LobbyState, ProfileStore, SignalingServer};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Profilspeicher aus den `[[profile]]`-Eintraegen
    pub fn profile_aufbauen(&self) -> Result<InMemoryProfile> {
        let profile = InMemoryProfile::neu();
        for eintrag in &self.config.profile {
            profile
                .registrieren(eintrag.public_key, &eintrag.name)
                .with_context(|| {
                    format!("Profil fuer {} ungueltig", eintrag.public_key.kurz())
                })?;
        }
        Ok(profile)
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.starten_mit_signal(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Ctrl-C-Handler nicht installierbar: {e}");
            }
        })
        .await
    }

    /// Startet alle Subsysteme und laeuft bis `signal` abgeschlossen ist
    ///
    /// Reihenfolge:
    /// 1. Profile, Metriken und Lobby-Zustand aufbauen
    /// 2. TCP-Listener binden
    /// 3. Observability-Server starten (falls aktiviert)
    /// 4. Auf Shutdown-Signal warten, dann `server_restart` an alle Sessions
    pub async fn starten_mit_signal<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let metriken = LobbyMetrics::neu()?;
        let profile = Arc::new(self.profile_aufbauen()?);
        tracing::info!(anzahl = profile.anzahl(), "Profile geladen");

        let lobby_konfig = self.config.lobby_konfig();
        tracing::info!(
            server_name = %lobby_konfig.server_name,
            max_clients = lobby_konfig.max_clients,
            doppel_login = ?lobby_konfig.doppel_login,
            "Lobby-Konfiguration"
        );
        let state = LobbyState::neu(lobby_konfig, profile, metriken.clone());
        let health = HealthState::neu(metriken.clone());

        let tcp_adresse = self.config.tcp_bind_adresse()?;
        let signaling = SignalingServer::binden(state, tcp_adresse)
            .await
            .with_context(|| format!("TCP-Listener auf {tcp_adresse} nicht bindbar"))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let observability = if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let mut rx = shutdown_rx.clone();
            Some(tokio::spawn(observability_server_starten(
                adresse,
                metriken,
                health.clone(),
                async move {
                    let _ = rx.wait_for(|stopp| *stopp).await;
                },
            )))
        } else {
            None
        };

        let signaling = tokio::spawn(signaling.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        signal.await;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        health.draining_setzen();
        let _ = shutdown_tx.send(true);

        signaling
            .await
            .context("Signaling-Task abgebrochen")?
            .context("TCP-Server mit Fehler beendet")?;
        if let Some(task) = observability {
            task.await.context("Observability-Task abgebrochen")??;
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ProfilEintrag;
    use lobbykey_core::PublicKey;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.netzwerk.bind_adresse = "127.0.0.1".into();
        config.netzwerk.tcp_port = 0;
        config.observability.aktiviert = false;
        config
    }

    #[test]
    fn profile_aus_konfiguration() {
        let mut config = test_config();
        config.profile.push(ProfilEintrag {
            public_key: PublicKey::from_bytes([0x11; 32]),
            name: "alice".into(),
        });
        let profile = Server::neu(config).profile_aufbauen().unwrap();
        assert_eq!(
            profile.profile_name(&PublicKey::from_bytes([0x11; 32])),
            Some("alice".to_string())
        );
    }

    #[test]
    fn doppelter_profilname_ist_fehler() {
        let mut config = test_config();
        for byte in [0x11, 0x22] {
            config.profile.push(ProfilEintrag {
                public_key: PublicKey::from_bytes([byte; 32]),
                name: "alice".into(),
            });
        }
        assert!(Server::neu(config).profile_aufbauen().is_err());
    }

    #[tokio::test]
    async fn server_startet_und_faehrt_sauber_herunter() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(Server::neu(test_config()).starten_mit_signal(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("Server nicht rechtzeitig beendet")
            .unwrap()
            .unwrap();
    }
}
