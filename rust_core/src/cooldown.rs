//! Quota cooldown for the chat transport.
//!
//! When the transport signals a quota/rate limit the poll loop trips this
//! breaker. Until the cooldown expires every invocation returns immediately
//! without touching the transport.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct QuotaCooldown {
    /// Minimum cooldown after a quota signal
    cooldown_duration: Duration,
    /// When the current cooldown ends
    until: RwLock<Option<Instant>>,
    /// Number of quota signals seen
    trips: AtomicU64,
}

impl QuotaCooldown {
    pub fn new(cooldown_duration: Duration) -> Self {
        Self {
            cooldown_duration,
            until: RwLock::new(None),
            trips: AtomicU64::new(0),
        }
    }

    /// Enter cooldown. A transport-supplied retry hint longer than the
    /// configured duration wins.
    pub fn trip(&self, retry_after: Option<Duration>) {
        let wait = retry_after
            .map(|r| r.max(self.cooldown_duration))
            .unwrap_or(self.cooldown_duration);
        *self.until.write() = Some(Instant::now() + wait);
        let trips = self.trips.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("Transport quota exceeded; cooling down for {:?} (trip #{})", wait, trips);
    }

    /// Whether calls are currently suppressed. Clears an expired cooldown.
    pub fn is_cooling(&self) -> bool {
        let until = *self.until.read();
        match until {
            Some(t) if Instant::now() < t => true,
            Some(_) => {
                self.reset();
                info!("Quota cooldown expired");
                false
            }
            None => false,
        }
    }

    /// Time left in the current cooldown
    pub fn remaining(&self) -> Option<Duration> {
        self.until
            .read()
            .and_then(|t| t.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    pub fn reset(&self) {
        *self.until.write() = None;
    }

    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }
}
