//! General utilities shared across the crate.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Abstraction over wall-clock `Instant::now()` so the rate controller
/// and the scrape worker's cooldown tracking can be driven by a fake
/// clock in tests instead of sleeping real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real system clock, used everywhere outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_unix_secs_is_positive_in_the_present() {
        assert!(now_unix_secs() > 1_700_000_000);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t0 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(clock.now() > t0);
    }
}
