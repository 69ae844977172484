use std::{cell::RefCell, time::Duration};

use quanta::{Clock, Instant};
use rand::{rngs::OsRng, Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

// Seeded straight from the OS: this runs from agent commits during thread teardown, when other
// thread locals such as `rand::rng()` may already be gone.
thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> = RefCell::new(
        Xoshiro256StarStar::try_from_rng(&mut OsRng)
            .unwrap_or_else(|_| Xoshiro256StarStar::seed_from_u64(FALLBACK_SEED)),
    );
}

const FALLBACK_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Returns a uniformly distributed value in `[0, upper)`.
///
/// Returns 0 when `upper` is 0 or 1.
pub(crate) fn fast_rand_less_than(upper: u64) -> u64 {
    if upper <= 1 {
        return 0;
    }

    FAST_RNG.try_with(|rng| rng.borrow_mut().random_range(0..upper)).unwrap_or(0)
}

/// Converts a duration to microseconds, saturating at `u64::MAX`.
pub(crate) fn duration_as_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Microsecond timestamps relative to the moment the clock was created.
///
/// Sample timestamps only ever get compared against each other, so an arbitrary origin is fine and
/// keeps the values small enough to subtract without care.
#[derive(Clone, Debug)]
pub(crate) struct MicrosClock {
    clock: Clock,
    origin: Instant,
}

impl MicrosClock {
    pub fn new(clock: Clock) -> Self {
        let origin = clock.now();
        Self { clock, origin }
    }

    pub fn now_micros(&self) -> u64 {
        duration_as_micros(self.clock.now().saturating_duration_since(self.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::{duration_as_micros, fast_rand_less_than, MicrosClock};
    use quanta::Clock;
    use std::time::Duration;

    #[test]
    fn test_simple_duration_as_micros() {
        assert_eq!(duration_as_micros(Duration::from_secs(3)), 3_000_000);
        assert_eq!(duration_as_micros(Duration::from_millis(500)), 500_000);
    }

    #[test]
    fn test_fast_rand_bounds() {
        assert_eq!(fast_rand_less_than(0), 0);
        assert_eq!(fast_rand_less_than(1), 0);
        for _ in 0..10_000 {
            assert!(fast_rand_less_than(7) < 7);
        }
    }

    #[test]
    fn test_micros_clock_follows_mock() {
        let (clock, mock) = Clock::mock();
        let micros = MicrosClock::new(clock);
        assert_eq!(micros.now_micros(), 0);

        mock.increment(Duration::from_millis(1500));
        assert_eq!(micros.now_micros(), 1_500_000);
    }
}
