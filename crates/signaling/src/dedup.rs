//! Duplikat-Erkennung fuer Lobby-Nachrichten
//!
//! Schluessel ist der SHA-256-Hash der kanonischen Nachrichten-Payload
//! (Absender, Zeitstempel, Inhalt). Ein Duplikat innerhalb der
//! Aufbewahrungszeit erhaelt dieselbe Sequence-ID und wird nicht erneut
//! verteilt.
//!
//! Nicht thread-safe; wird vom `MessageBus` unter seinem Mutex benutzt.

use chrono::{DateTime, Utc};
use lobbykey_core::{PublicKey, SequenceId};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub type DedupSchluessel = [u8; 32];

/// Berechnet den Dedup-Schluessel einer Nachricht
pub fn schluessel(sender: &PublicKey, timestamp: DateTime<Utc>, content: &str) -> DedupSchluessel {
    let payload = lobbykey_crypto::nachricht_payload(content, sender, timestamp);
    Sha256::digest(&payload).into()
}

pub struct DedupCache {
    aufbewahrung: Duration,
    eintraege: HashMap<DedupSchluessel, (SequenceId, Instant)>,
    reihenfolge: VecDeque<(DedupSchluessel, Instant)>,
}

impl DedupCache {
    pub fn neu(aufbewahrung: Duration) -> Self {
        Self {
            aufbewahrung,
            eintraege: HashMap::new(),
            reihenfolge: VecDeque::new(),
        }
    }

    /// Sucht eine bereits vergebene Sequence-ID
    pub fn finden(&self, schluessel: &DedupSchluessel, jetzt: Instant) -> Option<SequenceId> {
        self.eintraege
            .get(schluessel)
            .filter(|(_, eingetragen)| jetzt.saturating_duration_since(*eingetragen) < self.aufbewahrung)
            .map(|(seq, _)| *seq)
    }

    pub fn eintragen(&mut self, schluessel: DedupSchluessel, sequence_id: SequenceId, jetzt: Instant) {
        self.eintraege.insert(schluessel, (sequence_id, jetzt));
        self.reihenfolge.push_back((schluessel, jetzt));
    }

    /// Entfernt abgelaufene Eintraege
    pub fn aufraeumen(&mut self, jetzt: Instant) {
        while let Some((schluessel, eingetragen)) = self.reihenfolge.front().copied() {
            if jetzt.saturating_duration_since(eingetragen) < self.aufbewahrung {
                break;
            }
            self.reihenfolge.pop_front();
            // Nur entfernen, wenn der Eintrag nicht neuer geschrieben wurde
            if self
                .eintraege
                .get(&schluessel)
                .is_some_and(|(_, t)| *t == eingetragen)
            {
                self.eintraege.remove(&schluessel);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbykey_core::zeitstempel_jetzt;

    fn pk() -> PublicKey {
        PublicKey::from_bytes([0x11; 32])
    }

    #[test]
    fn gleiche_nachricht_gleicher_schluessel() {
        let ts = zeitstempel_jetzt();
        assert_eq!(schluessel(&pk(), ts, "hallo"), schluessel(&pk(), ts, "hallo"));
        assert_ne!(schluessel(&pk(), ts, "hallo"), schluessel(&pk(), ts, "hallo!"));
        assert_ne!(
            schluessel(&pk(), ts, "hallo"),
            schluessel(&PublicKey::from_bytes([0x22; 32]), ts, "hallo")
        );
    }

    #[test]
    fn finden_innerhalb_der_aufbewahrung() {
        let mut cache = DedupCache::neu(Duration::from_secs(60));
        let key = schluessel(&pk(), zeitstempel_jetzt(), "x");
        let t0 = Instant::now();

        assert!(cache.finden(&key, t0).is_none());
        cache.eintragen(key, SequenceId(7), t0);
        assert_eq!(cache.finden(&key, t0 + Duration::from_secs(59)), Some(SequenceId(7)));
        assert!(cache.finden(&key, t0 + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn aufraeumen_entfernt_abgelaufene() {
        let mut cache = DedupCache::neu(Duration::from_secs(10));
        let t0 = Instant::now();
        let ts = zeitstempel_jetzt();
        cache.eintragen(schluessel(&pk(), ts, "a"), SequenceId(1), t0);
        cache.eintragen(schluessel(&pk(), ts, "b"), SequenceId(2), t0 + Duration::from_secs(5));

        cache.aufraeumen(t0 + Duration::from_secs(11));
        assert_eq!(cache.len(), 1);
        cache.aufraeumen(t0 + Duration::from_secs(20));
        assert!(cache.is_empty());
    }
}
