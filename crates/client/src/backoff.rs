//! Exponentielles Backoff fuer Wiederverbindungen
//!
//! Wartezeit fuer Versuch `n` (ab 0): `initial * faktor^n`, begrenzt auf
//! `max`, danach mit +-25 % Jitter gestreut. Das Ergebnis ueberschreitet
//! `max` nie.

use rand_core::{OsRng, RngCore};
use std::time::Duration;

/// Anteil des Jitters an der Basis-Wartezeit
const JITTER_ANTEIL: f64 = 0.25;

/// Parameter fuer die Wiederverbindung
#[derive(Debug, Clone)]
pub struct BackoffKonfig {
    pub initial: Duration,
    pub max: Duration,
    pub faktor: f64,
    /// Maximale Anzahl Versuche, 0 = unbegrenzt
    pub max_versuche: u32,
}

impl Default for BackoffKonfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            faktor: 2.0,
            max_versuche: 0,
        }
    }
}

/// Zaehlt Versuche und liefert die naechste Wartezeit
#[derive(Debug)]
pub struct Backoff {
    konfig: BackoffKonfig,
    versuch: u32,
}

impl Backoff {
    pub fn neu(konfig: BackoffKonfig) -> Self {
        Self { konfig, versuch: 0 }
    }

    /// Bisher verbrauchte Versuche
    pub fn versuch(&self) -> u32 {
        self.versuch
    }

    /// Nach erfolgreicher Verbindung wieder bei `initial` beginnen
    pub fn zuruecksetzen(&mut self) {
        self.versuch = 0;
    }

    /// Naechste Wartezeit, oder `None` wenn `max_versuche` erschoepft ist
    pub fn naechste_wartezeit(&mut self) -> Option<Duration> {
        if self.konfig.max_versuche != 0 && self.versuch >= self.konfig.max_versuche {
            return None;
        }
        let zufall = OsRng.next_u32() as f64 / u32::MAX as f64;
        let wartezeit = wartezeit_berechnen(&self.konfig, self.versuch, zufall);
        self.versuch += 1;
        Some(wartezeit)
    }
}

/// Basis-Wartezeit ohne Jitter
pub fn basis_wartezeit(konfig: &BackoffKonfig, versuch: u32) -> Duration {
    let exponent = versuch.min(i32::MAX as u32) as i32;
    let sekunden = konfig.initial.as_secs_f64() * konfig.faktor.max(1.0).powi(exponent);
    if !sekunden.is_finite() || sekunden >= konfig.max.as_secs_f64() {
        konfig.max
    } else {
        Duration::from_secs_f64(sekunden)
    }
}

/// Wartezeit mit Jitter; `zufall` liegt in `[0, 1]`
pub(crate) fn wartezeit_berechnen(konfig: &BackoffKonfig, versuch: u32, zufall: f64) -> Duration {
    let basis = basis_wartezeit(konfig, versuch).as_secs_f64();
    let streuung = 1.0 - JITTER_ANTEIL + 2.0 * JITTER_ANTEIL * zufall.clamp(0.0, 1.0);
    Duration::from_secs_f64(basis * streuung).min(konfig.max)
}
