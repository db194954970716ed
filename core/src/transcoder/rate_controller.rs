//! PID rate controller.
//!
//! Maps an externally-observed client network speed percentage to a
//! video encoder quality dial. Called at most once per wall-clock
//! second; the published quality is read by the video lane on a
//! best-effort basis, via an atomic write rather than a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::utils::Clock;

const KP: f64 = 4.0;
const KI: f64 = 2.0;
const KD: f64 = 1.0;

/// Upper clamp for the published quality dial, an open parameter of
/// the PID formula. Chosen generously high so it never clips a normal
/// bandwidth-driven excursion, only a runaway one. See DESIGN.md.
pub const LAMBDA_MAX: f64 = 1024.0;

struct PidState {
    last_error: f64,
    integral: f64,
    last_clock: Option<Instant>,
}

pub struct PidController {
    state: Mutex<PidState>,
    quality_bits: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl PidController {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(PidState {
                last_error: 0.0,
                integral: 0.0,
                last_clock: None,
            }),
            quality_bits: AtomicU64::new(1.0f64.to_bits()),
            clock,
        }
    }

    /// Reports an observed client network speed percentage in `[0, 100]`.
    /// Calls spaced less than one wall-clock second apart are ignored
    /// entirely — they neither mutate the controller's state nor
    /// publish a new quality.
    pub fn set_network_speed(&self, speed_pct: f64) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(last) = state.last_clock {
            if now.duration_since(last) < Duration::from_secs(1) {
                log::trace!("rate controller: ignoring speed update inside 1s window");
                return;
            }
        }

        let dt = state
            .last_clock
            .map(|last| now.duration_since(last).as_secs_f64())
            .unwrap_or(1.0)
            .max(1.0);

        let error = 100.0 - speed_pct;
        let derivative = (error - state.last_error) / dt;
        state.integral += error;

        let quality = (1.0 + KP * error + KI * state.integral + KD * derivative).clamp(1.0, LAMBDA_MAX);

        state.last_error = error;
        state.last_clock = Some(now);
        drop(state);

        self.quality_bits.store(quality.to_bits(), Ordering::Release);
        log::debug!("rate controller: speed={speed_pct}% -> quality={quality}");
    }

    /// Best-effort read of the currently published quality.
    #[must_use]
    pub fn quality(&self) -> f64 {
        f64::from_bits(self.quality_bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::time::Duration;

    /// A clock whose `now()` is driven by an atomically-stored offset
    /// from a fixed epoch, so tests can advance time deterministically.
    struct FakeClock {
        epoch: Instant,
        offset_ms: StdAtomicU64,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                epoch: Instant::now(),
                offset_ms: StdAtomicU64::new(0),
            })
        }

        fn advance(&self, ms: u64) {
            self.offset_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.epoch + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn pid_integral_windup_produces_expected_quality_after_two_seconds() {
        let clock = FakeClock::new();
        let pid = PidController::new(clock.clone());

        pid.set_network_speed(100.0);
        assert_eq!(pid.quality(), 1.0);

        clock.advance(500);
        pid.set_network_speed(50.0);
        // Within 1s of the first call: ignored, quality unchanged.
        assert_eq!(pid.quality(), 1.0);

        clock.advance(1500); // total 2000ms since first call
        pid.set_network_speed(0.0);
        assert_eq!(pid.quality(), 651.0);
    }

    #[test]
    fn quality_never_drops_below_one() {
        let clock = FakeClock::new();
        let pid = PidController::new(clock.clone());
        pid.set_network_speed(100.0);
        clock.advance(1000);
        pid.set_network_speed(100.0);
        assert!(pid.quality() >= 1.0);
    }

    #[test]
    fn quality_clamps_at_lambda_max() {
        let clock = FakeClock::new();
        let pid = PidController::new(clock.clone());
        for _ in 0..6 {
            pid.set_network_speed(0.0);
            clock.advance(1000);
        }
        // Unclamped, the integral term alone would drive this well
        // past LAMBDA_MAX after 6 seconds of zero speed.
        assert_eq!(pid.quality(), LAMBDA_MAX);
    }
}
