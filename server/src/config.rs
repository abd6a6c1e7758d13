//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use lobbykey_core::PublicKey;
use lobbykey_signaling::{DoppelLoginPolitik, LobbyKonfig, RateLimitKonfig};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Lobby-Verhalten (Zeitlimits, Rate-Limit, Doppel-Login)
    pub lobby: LobbyEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Vorbelegte Profilnamen
    pub profile: Vec<ProfilEintrag>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers, wird in `auth_challenge` mitgeschickt
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Clients
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Lobbykey Server".into(),
            max_clients: 512,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer TCP und Observability
    pub bind_adresse: String,
    /// Port fuer das Lobby-Protokoll
    pub tcp_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9987,
        }
    }
}

/// Lobby-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyEinstellungen {
    pub handshake_timeout_ms: u64,
    /// Abstand der Server-Pings
    pub keepalive_sek: u64,
    /// Ohne eingehenden Frame wird die Verbindung danach getrennt
    pub verbindungs_timeout_sek: u64,
    /// Nachrichten pro Fenster und Session
    pub rate_limit_nachrichten: usize,
    pub rate_limit_fenster_ms: u64,
    /// Wie lange eine angenommene Nachricht als Duplikat erkannt wird
    pub dedup_aufbewahrung_sek: u64,
    /// Wie lange abgemeldete Identitaeten in der Presence-Registry bleiben
    pub offline_aufbewahrung_sek: u64,
    /// Maximale Inhaltslaenge in Zeichen
    pub max_inhalt_laenge: usize,
    pub max_frame_groesse: usize,
    /// Ausgehende Queue pro Session
    pub send_queue_groesse: usize,
    /// `supersede` oder `reject`
    pub doppel_login: DoppelLoginPolitik,
}

impl Default for LobbyEinstellungen {
    fn default() -> Self {
        let standard = LobbyKonfig::default();
        Self {
            handshake_timeout_ms: standard.handshake_timeout.as_millis() as u64,
            keepalive_sek: standard.keepalive_intervall.as_secs(),
            verbindungs_timeout_sek: standard.verbindungs_timeout.as_secs(),
            rate_limit_nachrichten: standard.rate_limit.max_nachrichten,
            rate_limit_fenster_ms: standard.rate_limit.fenster.as_millis() as u64,
            dedup_aufbewahrung_sek: standard.dedup_aufbewahrung.as_secs(),
            offline_aufbewahrung_sek: standard.offline_aufbewahrung.as_secs(),
            max_inhalt_laenge: standard.max_inhalt_laenge,
            max_frame_groesse: standard.max_frame_groesse,
            send_queue_groesse: standard.send_queue_groesse,
            doppel_login: standard.doppel_login,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

/// `[[profile]]`-Eintrag: fester Name fuer einen Public Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilEintrag {
    pub public_key: PublicKey,
    pub name: String,
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Bind-Adresse fuer das Lobby-Protokoll
    pub fn tcp_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige TCP-Bind-Adresse '{adresse}'"))
    }

    /// Bind-Adresse fuer den Observability-Server
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port);
        adresse
            .parse()
            .with_context(|| format!("Ungueltige Observability-Bind-Adresse '{adresse}'"))
    }

    /// Uebersetzt die Datei-Konfiguration in die Laufzeit-Konfiguration
    pub fn lobby_konfig(&self) -> LobbyKonfig {
        let lobby = &self.lobby;
        LobbyKonfig {
            server_name: self.server.name.clone(),
            max_clients: self.server.max_clients,
            handshake_timeout: Duration::from_millis(lobby.handshake_timeout_ms),
            keepalive_intervall: Duration::from_secs(lobby.keepalive_sek),
            verbindungs_timeout: Duration::from_secs(lobby.verbindungs_timeout_sek),
            rate_limit: RateLimitKonfig {
                max_nachrichten: lobby.rate_limit_nachrichten,
                fenster: Duration::from_millis(lobby.rate_limit_fenster_ms),
            },
            dedup_aufbewahrung: Duration::from_secs(lobby.dedup_aufbewahrung_sek),
            offline_aufbewahrung: Duration::from_secs(lobby.offline_aufbewahrung_sek),
            max_inhalt_laenge: lobby.max_inhalt_laenge,
            max_frame_groesse: lobby.max_frame_groesse,
            send_queue_groesse: lobby.send_queue_groesse,
            doppel_login: lobby.doppel_login,
        }
    }
}
