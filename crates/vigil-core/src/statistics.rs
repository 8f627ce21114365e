//! Event counters for the vigil client engine
//!
//! Counters increment atomically with the event they record and are readable
//! by the telemetry (info message) path.

use core::sync::atomic::{AtomicU64, Ordering};

// ----------------------------------------------------------------------------
// Counter Kinds
// ----------------------------------------------------------------------------

/// The events the engine counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Outbound messages handed to the transport
    SentMessage,
    /// Inbound messages accepted from the transport
    ReceivedMessage,
    /// Invalidation acks emitted on the wire
    AckedInvalidation,
    /// Registration ops resubmitted by the retry timer
    RegistrationRetry,
    /// Inbound messages dropped for a session-token mismatch
    TokenMismatch,
    /// Client-id assignment responses dropped for a nonce mismatch
    NonceMismatch,
    /// Inbound messages dropped as structurally malformed
    ValidationError,
}

impl Counter {
    const ALL: [Counter; 7] = [
        Counter::SentMessage,
        Counter::ReceivedMessage,
        Counter::AckedInvalidation,
        Counter::RegistrationRetry,
        Counter::TokenMismatch,
        Counter::NonceMismatch,
        Counter::ValidationError,
    ];

    fn index(self) -> usize {
        match self {
            Counter::SentMessage => 0,
            Counter::ReceivedMessage => 1,
            Counter::AckedInvalidation => 2,
            Counter::RegistrationRetry => 3,
            Counter::TokenMismatch => 4,
            Counter::NonceMismatch => 5,
            Counter::ValidationError => 6,
        }
    }

    /// Counter name as reported on info messages
    pub fn name(self) -> &'static str {
        match self {
            Counter::SentMessage => "sent_messages",
            Counter::ReceivedMessage => "received_messages",
            Counter::AckedInvalidation => "acked_invalidations",
            Counter::RegistrationRetry => "registration_retries",
            Counter::TokenMismatch => "token_mismatches",
            Counter::NonceMismatch => "nonce_mismatches",
            Counter::ValidationError => "validation_errors",
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Flat counter table keyed by [`Counter`]
#[derive(Debug, Default)]
pub struct Statistics {
    counters: [AtomicU64; 7],
}

impl Statistics {
    /// Create a zeroed counter table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of an event
    pub fn record(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Snapshot of every counter, as reported on info messages
    pub fn performance_counters(&self) -> Vec<(String, i64)> {
        Counter::ALL
            .iter()
            .map(|c| (c.name().to_string(), self.get(*c) as i64))
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = Statistics::new();
        for counter in Counter::ALL {
            assert_eq!(stats.get(counter), 0);
        }
    }

    #[test]
    fn test_record_increments_only_target() {
        let stats = Statistics::new();
        stats.record(Counter::TokenMismatch);
        stats.record(Counter::TokenMismatch);

        assert_eq!(stats.get(Counter::TokenMismatch), 2);
        assert_eq!(stats.get(Counter::SentMessage), 0);
    }

    #[test]
    fn test_snapshot_names_are_unique() {
        let stats = Statistics::new();
        stats.record(Counter::SentMessage);
        let snapshot = stats.performance_counters();

        assert_eq!(snapshot.len(), 7);
        let mut names: Vec<_> = snapshot.iter().map(|(k, _)| k.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
    }
}
