//! Message-Bus – Pruefung und Verteilung von Lobby-Nachrichten
//!
//! Ablauf von `submit`, bricht beim ersten Fehler ab:
//! 1. Syntaktische Pruefung (Inhalt, Absender, Zeitstempel)
//! 2. Absender muss die Identitaet der Session sein
//! 3. Signaturpruefung (ausserhalb jedes Locks)
//! 4. Rate-Limit pro Session
//! 5. Duplikat-Erkennung
//! 6. Sequence-ID vergeben und an alle Sessions verteilen
//!
//! Schritte 5 und 6 laufen unter einem gemeinsamen Mutex. Er wird nur fuer
//! die Vergabe und das nicht-blockierende Einreihen gehalten.

use lobbykey_core::{Ablehnungsgrund, LobbyMessage, PublicKey, SequenceId, SessionId};
use lobbykey_observability::LobbyMetrics;
use lobbykey_protocol::message::{zeitstempel_parsen, LobbyMessageData};
use lobbykey_protocol::{Payload, WireMessage};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::broadcast::{EventBroadcaster, Verteilung};
use crate::dedup::{self, DedupCache};
use crate::rate_limit::RateLimiter;
use crate::server_state::LobbyKonfig;

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Angenommene Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annahme {
    pub sequence_id: SequenceId,
    /// Nachricht war bereits bekannt und wurde nicht erneut verteilt
    pub duplikat: bool,
    pub verteilung: Verteilung,
}

/// Abgelehnte Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ablehnung {
    pub grund: Ablehnungsgrund,
    pub detail: String,
    /// Nur bei `RateLimited`
    pub retry_after: Option<Duration>,
}

impl Ablehnung {
    fn neu(grund: Ablehnungsgrund, detail: impl Into<String>) -> Self {
        Self {
            grund,
            detail: detail.into(),
            retry_after: None,
        }
    }

    fn fehlerhaft(detail: impl Into<String>) -> Self {
        Self::neu(Ablehnungsgrund::MalformedMessage, detail)
    }
}

// ---------------------------------------------------------------------------
// MessageBus
// ---------------------------------------------------------------------------

struct BusZustand {
    letzte_sequenz: SequenceId,
    dedup: DedupCache,
}

pub struct MessageBus {
    max_inhalt_laenge: usize,
    rate_limiter: RateLimiter,
    zustand: Mutex<BusZustand>,
    broadcaster: EventBroadcaster,
    metriken: LobbyMetrics,
}

impl MessageBus {
    pub fn neu(config: &LobbyKonfig, broadcaster: EventBroadcaster, metriken: LobbyMetrics) -> Self {
        Self {
            max_inhalt_laenge: config.max_inhalt_laenge,
            rate_limiter: RateLimiter::neu(config.rate_limit),
            zustand: Mutex::new(BusZustand {
                letzte_sequenz: SequenceId(0),
                dedup: DedupCache::neu(config.dedup_aufbewahrung),
            }),
            broadcaster,
            metriken,
        }
    }

    /// Prueft eine eingereichte Nachricht und verteilt sie an alle Sessions
    pub fn submit(
        &self,
        daten: &LobbyMessageData,
        absender: &PublicKey,
        session_id: &SessionId,
    ) -> Result<Annahme, Ablehnung> {
        let ergebnis = self.submit_intern(daten, absender, session_id);
        match &ergebnis {
            Ok(annahme) if annahme.duplikat => self.metriken.nachricht("duplicate"),
            Ok(annahme) => {
                self.metriken.nachricht("accepted");
                self.metriken
                    .broadcast_dropped_total
                    .inc_by(annahme.verteilung.verworfen as u64);
            }
            Err(ablehnung) => self.metriken.nachricht(ablehnung.grund.als_str()),
        }
        ergebnis
    }

    fn submit_intern(
        &self,
        daten: &LobbyMessageData,
        absender: &PublicKey,
        session_id: &SessionId,
    ) -> Result<Annahme, Ablehnung> {
        let pruefung_start = Instant::now();

        // 1. Syntax
        let content = match daten.content.as_deref() {
            Some(c) if !c.is_empty() => c,
            Some(_) => return Err(Ablehnung::fehlerhaft("Inhalt ist leer")),
            None => return Err(Ablehnung::fehlerhaft("Inhalt fehlt")),
        };
        if content.chars().count() > self.max_inhalt_laenge {
            return Err(Ablehnung::fehlerhaft(format!(
                "Inhalt laenger als {} Zeichen",
                self.max_inhalt_laenge
            )));
        }
        let sender_hex = daten
            .sender_public_key
            .as_deref()
            .ok_or_else(|| Ablehnung::fehlerhaft("senderPublicKey fehlt"))?;
        let sender = PublicKey::from_hex(sender_hex)
            .map_err(|e| Ablehnung::fehlerhaft(format!("senderPublicKey: {e}")))?;
        let timestamp = daten
            .timestamp
            .as_deref()
            .ok_or_else(|| Ablehnung::fehlerhaft("timestamp fehlt"))?;
        let timestamp = zeitstempel_parsen(timestamp)
            .ok_or_else(|| Ablehnung::fehlerhaft("timestamp ist kein RFC-3339-Zeitstempel"))?;

        // 2. Identitaet
        if sender != *absender {
            tracing::warn!(
                session = %session_id,
                session_key = %absender.kurz(),
                behauptet = %sender.kurz(),
                "Absender weicht von Session-Identitaet ab"
            );
            return Err(Ablehnung::neu(
                Ablehnungsgrund::IdentityMismatch,
                "senderPublicKey gehoert nicht zu dieser Session",
            ));
        }

        // 3. Signatur
        let payload = lobbykey_crypto::nachricht_payload(content, &sender, timestamp);
        let signatur =
            lobbykey_crypto::signatur_pruefen(&sender, &payload, daten.signature.as_deref())
                .map_err(|f| Ablehnung::neu(Ablehnungsgrund::from(f), f.to_string()))?;
        self.metriken
            .message_verify_seconds
            .observe(pruefung_start.elapsed().as_secs_f64());

        // 4. Rate-Limit
        if let Err(warten) = self.rate_limiter.pruefe_session(session_id) {
            tracing::debug!(session = %session_id, warten_ms = warten.as_millis() as u64, "Rate-Limit erreicht");
            return Err(Ablehnung {
                grund: Ablehnungsgrund::RateLimited,
                detail: "Zu viele Nachrichten".into(),
                retry_after: Some(warten),
            });
        }

        // 5. + 6. Duplikat-Erkennung, Vergabe und Verteilung
        let schluessel = dedup::schluessel(&sender, timestamp, content);
        let jetzt = Instant::now();
        let mut zustand = self.zustand.lock();
        zustand.dedup.aufraeumen(jetzt);

        if let Some(sequence_id) = zustand.dedup.finden(&schluessel, jetzt) {
            tracing::debug!(session = %session_id, sequence = %sequence_id, "Duplikat erkannt");
            return Ok(Annahme {
                sequence_id,
                duplikat: true,
                verteilung: Verteilung::default(),
            });
        }

        let sequence_id = zustand.letzte_sequenz.naechste();
        zustand.letzte_sequenz = sequence_id;
        zustand.dedup.eintragen(schluessel, sequence_id, jetzt);

        let nachricht = LobbyMessage {
            content: content.to_string(),
            sender_public_key: sender,
            signature: signatur,
            timestamp,
            sequence_id,
        };
        let verteilung = self.broadcaster.an_alle_senden(WireMessage::neu(Payload::LobbyMessage(
            LobbyMessageData::aus_nachricht(&nachricht),
        )));
        drop(zustand);

        tracing::debug!(
            sender = %sender.kurz(),
            sequence = %sequence_id,
            empfaenger = verteilung.gesendet,
            verworfen = verteilung.verworfen,
            "Nachricht verteilt"
        );

        Ok(Annahme {
            sequence_id,
            duplikat: false,
            verteilung,
        })
    }

    /// Gibt den Rate-Limit-Zustand einer beendeten Session frei
    pub fn session_entfernen(&self, session_id: &SessionId) {
        self.rate_limiter.entfernen(session_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
