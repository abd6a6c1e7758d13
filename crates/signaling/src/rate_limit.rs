//! Rate-Limiting pro Session (Sliding Window)
//!
//! Jede Session hat ein eigenes Fenster. Ueberschreitet eine Session das
//! Limit, bleiben alle anderen Sessions unberuehrt. Abgelehnte Nachrichten
//! belegen keinen Platz im Fenster.

use dashmap::DashMap;
use lobbykey_core::SessionId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Limit: hoechstens `max_nachrichten` innerhalb von `fenster`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitKonfig {
    pub max_nachrichten: usize,
    pub fenster: Duration,
}

impl Default for RateLimitKonfig {
    fn default() -> Self {
        Self {
            max_nachrichten: 10,
            fenster: Duration::from_secs(5),
        }
    }
}

/// Sliding-Window-Rate-Limiter
pub struct RateLimiter {
    konfig: RateLimitKonfig,
    fenster: DashMap<SessionId, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn neu(konfig: RateLimitKonfig) -> Self {
        Self {
            konfig,
            fenster: DashMap::new(),
        }
    }

    /// Prueft und verbucht eine Nachricht
    ///
    /// Bei Ueberschreitung wird die Wartezeit bis zum naechsten freien
    /// Platz zurueckgegeben.
    pub fn pruefe_session(&self, session_id: &SessionId) -> Result<(), Duration> {
        self.pruefe_session_zu(session_id, Instant::now())
    }

    pub(crate) fn pruefe_session_zu(
        &self,
        session_id: &SessionId,
        jetzt: Instant,
    ) -> Result<(), Duration> {
        let fenster = self.konfig.fenster;
        let mut zeitpunkte = self.fenster.entry(*session_id).or_default();

        while let Some(aeltester) = zeitpunkte.front() {
            if jetzt.saturating_duration_since(*aeltester) >= fenster {
                zeitpunkte.pop_front();
            } else {
                break;
            }
        }

        if zeitpunkte.len() >= self.konfig.max_nachrichten {
            let warten = zeitpunkte
                .front()
                .map(|t| fenster.saturating_sub(jetzt.saturating_duration_since(*t)))
                .unwrap_or(fenster);
            return Err(warten);
        }

        zeitpunkte.push_back(jetzt);
        Ok(())
    }

    /// Entfernt das Fenster einer beendeten Session
    pub fn entfernen(&self, session_id: &SessionId) {
        self.fenster.remove(session_id);
    }

    pub fn session_anzahl(&self) -> usize {
        self.fenster.len()
    }
}
