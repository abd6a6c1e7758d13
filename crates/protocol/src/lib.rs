//! lobbykey-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen, die zwischen Client und
//! Server ausgetauscht werden, sowie den Frame-Codec fuer TCP.

pub mod message;
pub mod wire;

pub use message::{ErrorCode, Payload, WireMessage};
pub use wire::{Empfangen, FrameCodec, UngueltigerFrame};
