//! Profil-Namen
//!
//! Profile sind unabhaengig von der Authentifizierung: auch unbekannte
//! Schluessel duerfen sich anmelden. Ein Profil liefert nur einen
//! Anzeigenamen fuer Presence-Events.

use lobbykey_core::PublicKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Erlaubte Laenge eines Profilnamens in Zeichen
pub const MIN_NAME_LAENGE: usize = 3;
pub const MAX_NAME_LAENGE: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfilFehler {
    #[error("Name '{0}' ist bereits vergeben")]
    NameVergeben(String),

    #[error("Ungueltiger Name: {0}")]
    UngueltigerName(String),
}

/// Schnittstelle zum Profilspeicher
pub trait ProfileStore: Send + Sync {
    /// Anzeigename einer Identitaet, falls registriert
    fn profile_name(&self, public_key: &PublicKey) -> Option<String>;

    /// Registriert oder aendert den Namen einer Identitaet
    ///
    /// Namen sind eindeutig (ohne Beachtung der Gross-/Kleinschreibung).
    fn registrieren(&self, public_key: PublicKey, name: &str) -> Result<(), ProfilFehler>;
}

#[derive(Default)]
struct Profile {
    namen: HashMap<PublicKey, String>,
    /// Kleingeschriebener Name -> Besitzer
    vergeben: HashMap<String, PublicKey>,
}

/// In-Memory-Profilspeicher, aus der Konfiguration befuellt
#[derive(Default)]
pub struct InMemoryProfile {
    inner: RwLock<Profile>,
}

impl InMemoryProfile {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn anzahl(&self) -> usize {
        self.inner.read().namen.len()
    }
}

/// Namen bestehen aus 3 bis 30 ASCII-Buchstaben, Ziffern oder `_`
fn name_pruefen(name: &str) -> Result<String, ProfilFehler> {
    let laenge = name.chars().count();
    if !(MIN_NAME_LAENGE..=MAX_NAME_LAENGE).contains(&laenge) {
        return Err(ProfilFehler::UngueltigerName(format!(
            "muss {MIN_NAME_LAENGE}-{MAX_NAME_LAENGE} Zeichen lang sein"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProfilFehler::UngueltigerName(
            "nur Buchstaben, Ziffern und _ erlaubt".into(),
        ));
    }
    Ok(name.to_string())
}

impl ProfileStore for InMemoryProfile {
    fn profile_name(&self, public_key: &PublicKey) -> Option<String> {
        self.inner.read().namen.get(public_key).cloned()
    }

    fn registrieren(&self, public_key: PublicKey, name: &str) -> Result<(), ProfilFehler> {
        let name = name_pruefen(name)?;
        let normalisiert = name.to_lowercase();

        let mut profile = self.inner.write();
        if let Some(besitzer) = profile.vergeben.get(&normalisiert) {
            if *besitzer != public_key {
                return Err(ProfilFehler::NameVergeben(name));
            }
        }

        if let Some(alt) = profile.namen.insert(public_key, name) {
            profile.vergeben.remove(&alt.to_lowercase());
        }
        profile.vergeben.insert(normalisiert, public_key);
        Ok(())
    }
}
