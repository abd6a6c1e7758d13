//! Offline-Queue fuer ausgehende Nachrichten
//!
//! Begrenzte FIFO aller signierten Nachrichten, fuer die noch kein
//! `verification_status` eingetroffen ist. Gesendet wird immer nur der Kopf
//! der Queue; der naechste Eintrag folgt erst nach dessen Bestaetigung. So
//! bleibt die Reihenfolge auch dann erhalten, wenn der Server einzelne
//! Nachrichten wegen Rate-Limit zurueckweist. Nach jeder (Wieder-)Anmeldung
//! beginnt das Senden erneut beim Kopf; doppelt angekommene Nachrichten
//! erkennt der Server an ihrem Inhalt.

use std::collections::VecDeque;
use std::time::Instant;

use lobbykey_protocol::message::LobbyMessageData;

use crate::error::{ClientError, ClientResult};

/// Standard-Kapazitaet der Queue
pub const DEFAULT_KAPAZITAET: usize = 100;

/// Eintrag der Offline-Queue
#[derive(Debug, Clone)]
pub struct Ausstehend {
    /// Signatur in Draht-Darstellung, Schluessel fuer die Bestaetigung
    pub signatur: String,
    pub daten: LobbyMessageData,
    pub eingereiht: Instant,
    /// Auf der aktuellen Verbindung bereits gesendet
    gesendet: bool,
}

/// Begrenzte FIFO unbestaetigter Nachrichten
#[derive(Debug)]
pub struct OfflineQueue {
    kapazitaet: usize,
    eintraege: VecDeque<Ausstehend>,
    /// Nach `RATE_LIMITED` wird bis zu diesem Zeitpunkt nichts gesendet
    pausiert_bis: Option<Instant>,
}

impl OfflineQueue {
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            kapazitaet,
            eintraege: VecDeque::with_capacity(kapazitaet.min(DEFAULT_KAPAZITAET)),
            pausiert_bis: None,
        }
    }

    /// Haengt eine signierte Nachricht an; eine volle Queue lehnt ab
    pub fn einreihen(&mut self, daten: LobbyMessageData) -> ClientResult<()> {
        if self.eintraege.len() >= self.kapazitaet {
            return Err(ClientError::QueueFull {
                kapazitaet: self.kapazitaet,
            });
        }
        let signatur = daten
            .signature
            .clone()
            .ok_or_else(|| ClientError::UngueltigeNachricht("Signatur fehlt".into()))?;
        self.eintraege.push_back(Ausstehend {
            signatur,
            daten,
            eingereiht: Instant::now(),
            gesendet: false,
        });
        Ok(())
    }

    /// Entfernt den Eintrag mit dieser Signatur (case-insensitiv)
    pub fn bestaetigen(&mut self, signatur: &str) -> Option<Ausstehend> {
        let position = self
            .eintraege
            .iter()
            .position(|e| e.signatur.eq_ignore_ascii_case(signatur))?;
        self.eintraege.remove(position)
    }

    /// Liefert den Kopf der Queue, falls er gesendet werden darf, und
    /// markiert ihn als gesendet
    ///
    /// `None` solange der Kopf unbestaetigt unterwegs ist oder eine
    /// Rate-Limit-Pause laeuft.
    pub fn naechste_zum_senden(&mut self, jetzt: Instant) -> Option<LobbyMessageData> {
        if self.pausiert_bis.is_some_and(|bis| jetzt < bis) {
            return None;
        }
        self.pausiert_bis = None;

        let kopf = self.eintraege.front_mut()?;
        if kopf.gesendet {
            return None;
        }
        kopf.gesendet = true;
        Some(kopf.daten.clone())
    }

    /// Stellt einen abgewiesenen Eintrag zurueck; er bleibt an seiner
    /// Position und wird fruehestens ab `bis` erneut gesendet
    pub fn zurueckstellen(&mut self, signatur: &str, bis: Instant) -> bool {
        let Some(eintrag) = self
            .eintraege
            .iter_mut()
            .find(|e| e.signatur.eq_ignore_ascii_case(signatur))
        else {
            return false;
        };
        eintrag.gesendet = false;
        self.pausiert_bis = Some(self.pausiert_bis.map_or(bis, |alt| alt.max(bis)));
        true
    }

    /// Ende der laufenden Rate-Limit-Pause
    pub fn pause_ende(&self) -> Option<Instant> {
        self.pausiert_bis
    }

    /// Nach (Wieder-)Anmeldung: alles muss erneut gesendet werden, das
    /// Rate-Limit-Fenster der alten Session gilt nicht mehr
    pub fn als_ungesendet_markieren(&mut self) {
        for eintrag in &mut self.eintraege {
            eintrag.gesendet = false;
        }
        self.pausiert_bis = None;
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    /// Signaturen in Reihenfolge
    pub fn signaturen(&self) -> Vec<String> {
        self.eintraege.iter().map(|e| e.signatur.clone()).collect()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::neu(DEFAULT_KAPAZITAET)
    }
}
