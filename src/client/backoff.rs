//! Reconnection backoff
//!
//! Deterministic exponential delay with no jitter: 800ms base, x1.7 per
//! consecutive failure, capped at 15s. The schedule resets only on a
//! successful handshake, never merely on a socket connecting.

use std::time::Duration;

/// Initial reconnect delay
pub const BACKOFF_BASE_MS: u64 = 800;
/// Growth factor applied per consecutive failure
pub const BACKOFF_FACTOR: f64 = 1.7;
/// Delay ceiling
pub const BACKOFF_CAP_MS: u64 = 15_000;

/// Computes successive reconnect delays
#[derive(Debug)]
pub struct ReconnectBackoff {
    next_ms: u64,
}

impl ReconnectBackoff {
    /// Create a schedule positioned at the base delay
    pub fn new() -> Self {
        ReconnectBackoff {
            next_ms: BACKOFF_BASE_MS,
        }
    }

    /// Take the current delay and advance the schedule
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next_ms;
        let grown = (self.next_ms as f64 * BACKOFF_FACTOR).round() as u64;
        self.next_ms = grown.min(BACKOFF_CAP_MS);
        Duration::from_millis(current)
    }

    /// The delay the next call to [`next_delay`](Self::next_delay) will return
    pub fn peek(&self) -> Duration {
        Duration::from_millis(self.next_ms)
    }

    /// Return to the base delay. Called after a successful handshake.
    pub fn reset(&mut self) {
        self.next_ms = BACKOFF_BASE_MS;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_sequence() {
        let mut backoff = ReconnectBackoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1360));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2312));
    }

    #[test]
    fn test_cap_at_fifteen_seconds() {
        let mut backoff = ReconnectBackoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..32 {
            last = backoff.next_delay();
            assert!(last <= Duration::from_millis(BACKOFF_CAP_MS));
        }
        assert_eq!(last, Duration::from_millis(BACKOFF_CAP_MS));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = ReconnectBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
    }
}
