//! Client-seitiger Spiegel der Online-Liste
//!
//! Wird aus `auth_response`/`presence_snapshot` initialisiert und durch
//! `user_joined`/`user_left` fortgeschrieben. Beide Events sind idempotent:
//! ein doppeltes Join aendert die Menge nicht.

use std::collections::BTreeMap;

use lobbykey_core::PublicKey;
use lobbykey_protocol::message::{PresenceSnapshot, PresenceUpdate, PresenceUser};

/// Sortierte Online-Liste aus Sicht des Clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LobbyAnsicht {
    nutzer: BTreeMap<PublicKey, Option<String>>,
}

impl LobbyAnsicht {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Ersetzt die Liste vollstaendig
    pub fn snapshot_anwenden(&mut self, nutzer: &[PresenceUser]) {
        self.nutzer = nutzer
            .iter()
            .map(|u| (u.public_key, u.profile_name.clone()))
            .collect();
    }

    pub fn snapshot(&mut self, snapshot: &PresenceSnapshot) {
        self.snapshot_anwenden(&snapshot.users);
    }

    /// Gibt `true` zurueck wenn der Nutzer neu ist
    pub fn beigetreten(&mut self, update: &PresenceUpdate) -> bool {
        self.nutzer
            .insert(update.public_key, update.profile_name.clone())
            .is_none()
    }

    /// Gibt `true` zurueck wenn der Nutzer vorhanden war
    pub fn verlassen(&mut self, update: &PresenceUpdate) -> bool {
        self.nutzer.remove(&update.public_key).is_some()
    }

    pub fn leeren(&mut self) {
        self.nutzer.clear();
    }

    pub fn anzahl(&self) -> usize {
        self.nutzer.len()
    }

    pub fn ist_online(&self, public_key: &PublicKey) -> bool {
        self.nutzer.contains_key(public_key)
    }

    /// Nutzer nach Public Key sortiert
    pub fn nutzer(&self) -> Vec<PresenceUser> {
        self.nutzer
            .iter()
            .map(|(pk, name)| PresenceUser {
                public_key: *pk,
                profile_name: name.clone(),
            })
            .collect()
    }

    /// Anzeigetext fuer die Anzahl
    pub fn anzeige(&self) -> String {
        anzeige_fuer(self.anzahl())
    }
}

/// "No users online", "1 user online", "N users online"
pub fn anzeige_fuer(anzahl: usize) -> String {
    match anzahl {
        0 => "No users online".to_string(),
        1 => "1 user online".to_string(),
        n => format!("{n} users online"),
    }
}
