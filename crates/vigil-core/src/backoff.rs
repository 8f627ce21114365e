//! Exponential backoff delay generation
//!
//! Paces the re-emission of requests the server failed to answer usefully,
//! e.g. identity requests whose responses were discarded. After a reset the
//! first delay is zero; each subsequent delay is drawn uniformly from an
//! exponentially growing window, capped at a maximum factor of the initial
//! window.

use core::time::Duration;

// ----------------------------------------------------------------------------
// Exponential Backoff
// ----------------------------------------------------------------------------

/// Generates successive retry delays with randomized exponential growth
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_max_delay: Duration,
    max_exponential_factor: u32,
    current_max_delay: Duration,
    in_retry_mode: bool,
    rng: fastrand::Rng,
}

impl ExponentialBackoff {
    /// Create a generator whose first retry window is `initial_max_delay`
    /// and whose windows never exceed `initial_max_delay *
    /// max_exponential_factor`.
    pub fn new(initial_max_delay: Duration, max_exponential_factor: u32, seed: u64) -> Self {
        Self {
            initial_max_delay,
            max_exponential_factor,
            current_max_delay: initial_max_delay,
            in_retry_mode: false,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// The next delay. Zero immediately after a reset.
    pub fn next_delay(&mut self) -> Duration {
        let mut delay = Duration::ZERO;
        if self.in_retry_mode {
            let window_ms = self.current_max_delay.as_millis() as u64;
            delay = Duration::from_millis(self.rng.u64(0..=window_ms));

            let cap = self.initial_max_delay * self.max_exponential_factor;
            if self.current_max_delay <= cap {
                self.current_max_delay = (self.current_max_delay * 2).min(cap);
            }
        }
        self.in_retry_mode = true;
        delay
    }

    /// Return to the initial state; the next delay will be zero
    pub fn reset(&mut self) {
        self.current_max_delay = self.initial_max_delay;
        self.in_retry_mode = false;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_is_zero() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), 8, 42);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_delays_stay_within_growing_window() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), 8, 42);
        backoff.next_delay(); // zero

        let mut window = Duration::from_secs(1);
        for _ in 0..6 {
            let delay = backoff.next_delay();
            assert!(delay <= window, "{delay:?} exceeds {window:?}");
            window = (window * 2).min(Duration::from_secs(8));
        }
    }

    #[test]
    fn test_window_is_capped() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), 4, 7);
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), 8, 42);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
