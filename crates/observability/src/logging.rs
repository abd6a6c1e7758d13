//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `LK_LOG_LEVEL`: Log-Level oder Filter-Direktive, Standard: info
//! - `LK_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Umgebungsvariablen haben Vorrang vor den Werten aus der Konfigurationsdatei.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "LK_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LK_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Darf pro Prozess nur einmal erfolgreich aufgerufen werden; ein zweiter
/// Aufruf liefert einen Fehler statt zu paniken.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let level = wert_oder_fallback(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format = wert_oder_fallback(std::env::var(ENV_LOG_FORMAT).ok(), format);

    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    ergebnis.map_err(|e| anyhow!("Logging bereits initialisiert: {e}"))?;

    if !log_format_gueltig(&format) {
        tracing::warn!(format = %format, "Unbekanntes Log-Format, verwende text");
    }
    Ok(())
}

/// Liefert den Wert aus der Umgebung, sonst den Konfigurationswert.
/// Leere Werte zaehlen als nicht gesetzt.
fn wert_oder_fallback(env_wert: Option<String>, fallback: &str) -> String {
    match env_wert {
        Some(w) if !w.trim().is_empty() => w.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
