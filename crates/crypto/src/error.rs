//! Fehlertypen fuer das Kryptografie-Subsystem

use lobbykey_core::FormatFehler;
use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Ungueltiges Schluesselformat: {0}")]
    Schluesselformat(#[from] FormatFehler),

    #[error("Zufallsquelle nicht verfuegbar: {0}")]
    Zufall(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
