//! Rate limiting for outbound transport signals
//!
//! Every request to signal the transport that outbound data is ready passes
//! through the [`Throttler`]. The throttler never drops the underlying data;
//! it only delays the notification, and all deferred requests collapse into
//! a single pending one.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Rate Limit Window
// ----------------------------------------------------------------------------

/// One rate-limit window: at most `count` sends per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    window: Duration,
    count: usize,
}

impl RateLimit {
    /// Create a window allowing `count` sends per `window`
    pub fn new(window: Duration, count: usize) -> Self {
        Self { window, count }
    }

    /// Window duration
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Sends allowed per window
    pub fn count(&self) -> usize {
        self.count
    }
}

// ----------------------------------------------------------------------------
// Throttle Outcome
// ----------------------------------------------------------------------------

/// Result of asking the throttler to pass a signal through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleOutcome {
    /// Every window allows a send now; the send was recorded
    SendNow,
    /// A window is full; retry at the given time
    Deferred(Timestamp),
    /// A deferral is already pending; this request collapsed into it
    AlreadyDeferred,
}

// ----------------------------------------------------------------------------
// Throttler
// ----------------------------------------------------------------------------

/// Enforces a set of simultaneous rate-limit windows over outbound signals
#[derive(Debug)]
pub struct Throttler {
    limits: Vec<RateLimit>,
    /// Timestamps of recent sends, oldest first
    history: VecDeque<Timestamp>,
    deferred_until: Option<Timestamp>,
}

impl Throttler {
    /// Create a throttler with the given windows
    pub fn new(limits: Vec<RateLimit>) -> Self {
        Self {
            limits,
            history: VecDeque::new(),
            deferred_until: None,
        }
    }

    /// Ask to pass one signal through at `now`.
    ///
    /// On [`ThrottleOutcome::Deferred`] the caller must arrange to call
    /// again at the returned time; further requests in the meantime return
    /// [`ThrottleOutcome::AlreadyDeferred`] and require no new arrangement.
    pub fn attempt(&mut self, now: Timestamp) -> ThrottleOutcome {
        if let Some(until) = self.deferred_until {
            if now < until {
                return ThrottleOutcome::AlreadyDeferred;
            }
            self.deferred_until = None;
        }

        self.prune(now);

        let mut allowed_at = now;
        for limit in &self.limits {
            let in_window = self
                .history
                .iter()
                .filter(|&&sent| now.since(sent) < limit.window.as_millis() as u64)
                .count();
            if in_window >= limit.count {
                // The window frees when its count-th most recent send ages out.
                let nth_recent = self.history[self.history.len() - limit.count];
                let free_at = nth_recent.plus(limit.window);
                if free_at > allowed_at {
                    allowed_at = free_at;
                }
            }
        }

        if allowed_at > now {
            self.deferred_until = Some(allowed_at);
            ThrottleOutcome::Deferred(allowed_at)
        } else {
            self.history.push_back(now);
            ThrottleOutcome::SendNow
        }
    }

    /// Whether a deferred signal is pending
    pub fn is_deferred(&self) -> bool {
        self.deferred_until.is_some()
    }

    fn prune(&mut self, now: Timestamp) {
        let longest = self
            .limits
            .iter()
            .map(|l| l.window.as_millis() as u64)
            .max()
            .unwrap_or(0);
        while let Some(&oldest) = self.history.front() {
            if now.since(oldest) >= longest {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn default_throttler() -> Throttler {
        Throttler::new(vec![
            RateLimit::new(Duration::from_secs(1), 1),
            RateLimit::new(Duration::from_secs(60), 6),
        ])
    }

    #[test]
    fn test_first_send_allowed() {
        let mut throttler = default_throttler();
        assert_eq!(
            throttler.attempt(Timestamp::new(0)),
            ThrottleOutcome::SendNow
        );
    }

    #[test]
    fn test_fine_window_defers() {
        let mut throttler = default_throttler();
        assert_eq!(
            throttler.attempt(Timestamp::new(0)),
            ThrottleOutcome::SendNow
        );
        assert_eq!(
            throttler.attempt(Timestamp::new(500)),
            ThrottleOutcome::Deferred(Timestamp::new(1000))
        );
    }

    #[test]
    fn test_requests_collapse_while_deferred() {
        let mut throttler = default_throttler();
        throttler.attempt(Timestamp::new(0));
        assert!(matches!(
            throttler.attempt(Timestamp::new(100)),
            ThrottleOutcome::Deferred(_)
        ));
        assert_eq!(
            throttler.attempt(Timestamp::new(200)),
            ThrottleOutcome::AlreadyDeferred
        );
        assert_eq!(
            throttler.attempt(Timestamp::new(900)),
            ThrottleOutcome::AlreadyDeferred
        );
        // At the deferral time the send goes through.
        assert_eq!(
            throttler.attempt(Timestamp::new(1000)),
            ThrottleOutcome::SendNow
        );
    }

    #[test]
    fn test_coarse_window_enforced() {
        let mut throttler = default_throttler();
        for i in 0..6u64 {
            assert_eq!(
                throttler.attempt(Timestamp::new(i * 1000)),
                ThrottleOutcome::SendNow,
                "send {i} should pass"
            );
        }
        // Seventh within the minute defers until the first send ages out.
        assert_eq!(
            throttler.attempt(Timestamp::new(6000)),
            ThrottleOutcome::Deferred(Timestamp::new(60_000))
        );
        assert_eq!(
            throttler.attempt(Timestamp::new(60_000)),
            ThrottleOutcome::SendNow
        );
    }

    #[test]
    fn test_bounded_rate_over_long_run() {
        let mut throttler = default_throttler();
        let mut sends = 0;
        let mut t = 0u64;
        while t < 300_000 {
            match throttler.attempt(Timestamp::new(t)) {
                ThrottleOutcome::SendNow => sends += 1,
                ThrottleOutcome::Deferred(_) | ThrottleOutcome::AlreadyDeferred => {}
            }
            t += 10;
        }
        assert!(sends <= 30, "sent {sends} times in 5 minutes");
        assert!(sends >= 28, "sent only {sends} times in 5 minutes");
    }
}
