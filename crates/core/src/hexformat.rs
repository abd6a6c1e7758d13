//! Hex-Darstellung fuer Schluessel und Signaturen
//!
//! Alle Schluessel und Signaturen werden als `0x` + Kleinbuchstaben-Hex
//! dargestellt. Beim Einlesen werden Gross- und Kleinbuchstaben akzeptiert,
//! das Praefix `0x` ist jedoch Pflicht.
//!
//! ```text
//! PublicKey / PrivateKey : 0x + 64 Hex-Zeichen (32 Bytes)
//! Signatur               : 0x + 128 Hex-Zeichen (64 Bytes)
//! ```

use thiserror::Error;

/// Praefix fuer alle Hex-Darstellungen
pub const HEX_PRAEFIX: &str = "0x";

/// Syntaktischer Formatfehler einer Hex-Darstellung
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatFehler {
    #[error("Praefix '0x' fehlt")]
    PraefixFehlt,

    #[error("Ungueltige Laenge: erwartet {erwartet} Hex-Zeichen, erhalten {erhalten}")]
    FalscheLaenge { erwartet: usize, erhalten: usize },

    #[error("Ungueltiges Hex-Zeichen")]
    UngueltigesZeichen,
}

/// Entfernt ein fuehrendes `0x`, falls vorhanden
pub fn strip_0x(wert: &str) -> &str {
    wert.strip_prefix(HEX_PRAEFIX).unwrap_or(wert)
}

/// Fuegt `0x` hinzu, falls noch nicht vorhanden (idempotent)
pub fn add_0x(wert: &str) -> String {
    if wert.starts_with(HEX_PRAEFIX) {
        wert.to_string()
    } else {
        format!("{HEX_PRAEFIX}{wert}")
    }
}

/// Kodiert Bytes als `0x` + Kleinbuchstaben-Hex
pub fn hex_kodieren(bytes: &[u8]) -> String {
    format!("{HEX_PRAEFIX}{}", hex::encode(bytes))
}

/// Dekodiert eine `0x`-Hex-Darstellung mit exakt `N` Bytes
///
/// Die Laenge wird vor dem Zeichensatz geprueft, sodass eine falsche Laenge
/// immer als `FalscheLaenge` gemeldet wird.
pub fn hex_dekodieren<const N: usize>(wert: &str) -> Result<[u8; N], FormatFehler> {
    let ohne_praefix = wert
        .strip_prefix(HEX_PRAEFIX)
        .ok_or(FormatFehler::PraefixFehlt)?;

    if ohne_praefix.len() != N * 2 {
        return Err(FormatFehler::FalscheLaenge {
            erwartet: N * 2,
            erhalten: ohne_praefix.len(),
        });
    }

    let mut bytes = [0u8; N];
    hex::decode_to_slice(ohne_praefix, &mut bytes).map_err(|_| FormatFehler::UngueltigesZeichen)?;
    Ok(bytes)
}

/// Prueft ob ein String ein gueltiger Public Key ist (0x + 64 Hex)
pub fn ist_public_key_format(wert: &str) -> bool {
    hex_dekodieren::<32>(wert).is_ok()
}

/// Prueft ob ein String eine gueltige Signatur ist (0x + 128 Hex)
pub fn ist_signatur_format(wert: &str) -> bool {
    hex_dekodieren::<64>(wert).is_ok()
}
