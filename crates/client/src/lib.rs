//! # lobbykey-client
//!
//! Client-Seite der Lobbykey-Verbindung.
//!
//! ## Module
//! - `connection` - TCP-Transport und Client-Handshake
//! - `manager` - Verbindungs-Task mit Wiederverbindung, Status und Events
//! - `offline_queue` - Begrenzte Queue unbestaetigter Nachrichten
//! - `backoff` - Exponentielles Backoff mit Jitter
//! - `lobby` - Spiegel der Online-Liste
//! - `verifikation` - Lokale Signaturpruefung empfangener Nachrichten

pub mod backoff;
pub mod connection;
pub mod error;
pub mod lobby;
pub mod manager;
pub mod offline_queue;
pub mod verifikation;

pub use backoff::{Backoff, BackoffKonfig};
pub use connection::ServerConnection;
pub use error::{ClientError, ClientResult};
pub use lobby::LobbyAnsicht;
pub use manager::{ClientEvent, ClientKonfig, LobbyClient, VerbindungsStatus};
pub use offline_queue::OfflineQueue;
pub use verifikation::nachricht_pruefen;
