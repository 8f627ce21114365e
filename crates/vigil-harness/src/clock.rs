//! Virtual time for deterministic tests
//!
//! A shared-handle clock: clone one handle into the engine, keep another in
//! the test, and advance time by hand. Nothing moves until the test says so.

use core::time::Duration;
use std::sync::{Arc, Mutex};

use vigil_core::{TimeSource, Timestamp};

/// Manually advanced clock for deterministic tests
#[derive(Debug, Clone)]
pub struct VirtualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl VirtualClock {
    /// A clock starting at `start_ms`
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(Timestamp::new(start_ms))),
        }
    }

    /// A clock starting well past zero, so subtraction-based window math
    /// never saturates at the origin
    pub fn new() -> Self {
        Self::starting_at(1_000_000_000)
    }

    /// Advance virtual time
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = now.plus(delta);
    }

    /// Advance virtual time by milliseconds
    pub fn advance_ms(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set virtual time to an absolute value
    pub fn set(&self, timestamp: Timestamp) {
        *self.now.lock().unwrap() = timestamp;
    }

    /// Current virtual time
    pub fn current(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Timestamp {
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_shared_across_clones() {
        let clock = VirtualClock::starting_at(0);
        let handle = clock.clone();

        clock.advance_ms(250);
        assert_eq!(handle.now().as_millis(), 250);

        handle.advance(Duration::from_secs(1));
        assert_eq!(clock.now().as_millis(), 1250);
    }

    #[test]
    fn test_set_overrides() {
        let clock = VirtualClock::new();
        clock.set(Timestamp::new(42));
        assert_eq!(clock.now().as_millis(), 42);
    }
}
