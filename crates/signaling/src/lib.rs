//! lobbykey-signaling – Server-Seite der signierten Lobby
//!
//! Dieser Crate implementiert Handshake, Sessions, Presence und die
//! Verteilung signierter Lobby-Nachrichten.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Handshake: Challenge -> Signatur -> Session
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- MessageBus  (Pruefung, Rate-Limit, Dedup, Sequenz, Fan-out)
//!
//! PresenceRegistry – Wer ist online
//! SessionManager   – Authentifizierte Sessions
//! EventBroadcaster – Frames an Sessions senden
//! ```

pub mod broadcast;
pub mod connection;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod message_bus;
pub mod presence;
pub mod profile;
pub mod rate_limit;
pub mod server_state;
pub mod session;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use handshake::AuthHandshake;
pub use message_bus::MessageBus;
pub use presence::PresenceRegistry;
pub use profile::{InMemoryProfile, ProfileStore};
pub use rate_limit::RateLimitKonfig;
pub use server_state::{DoppelLoginPolitik, LobbyKonfig, LobbyState};
pub use session::SessionManager;
pub use tcp::SignalingServer;
