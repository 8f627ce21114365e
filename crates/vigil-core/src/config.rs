//! Centralized configuration for the vigil client engine

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::throttle::RateLimit;

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for the invalidation client engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Delay before batched outbound items (registrations, acks, sync
    /// subtrees) trigger an outbound-ready signal
    pub batching_delay: Duration,
    /// How long a sent registration op may remain unacknowledged before it
    /// is resubmitted
    pub registration_timeout: Duration,
    /// Polling interval used until the server advertises one
    pub initial_poll_interval: Duration,
    /// Heartbeat interval used until the server advertises one
    pub initial_heartbeat_interval: Duration,
    /// Rate limits applied to outbound transport signals; every window must
    /// hold simultaneously
    pub throttle_limits: Vec<RateLimit>,
    /// Delay between a token change and the persistence write
    pub persistence_delay: Duration,
    /// Seed for the engine's RNG (nonces, backoff smearing)
    pub rng_seed: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            batching_delay: Duration::from_millis(500),
            registration_timeout: Duration::from_secs(60),
            initial_poll_interval: Duration::from_secs(60),
            initial_heartbeat_interval: Duration::from_secs(20 * 60),
            throttle_limits: vec![
                RateLimit::new(Duration::from_secs(1), 1),
                RateLimit::new(Duration::from_secs(60), 6),
            ],
            persistence_delay: Duration::from_millis(100),
            rng_seed: 0x7691_1aed_0c5e_6b4f,
        }
    }
}

impl ClientConfig {
    /// Configuration with short delays for tests
    pub fn testing() -> Self {
        Self {
            batching_delay: Duration::from_millis(10),
            registration_timeout: Duration::from_secs(5),
            initial_poll_interval: Duration::from_secs(5),
            initial_heartbeat_interval: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.throttle_limits.is_empty() {
            return Err("at least one throttle window is required".into());
        }
        if self.batching_delay.is_zero() {
            return Err("batching delay cannot be zero".into());
        }
        if self.registration_timeout < self.batching_delay {
            return Err("registration timeout cannot be shorter than the batching delay".into());
        }
        Ok(())
    }

    /// Named parameters reported on outbound info messages
    pub fn config_params(&self) -> Vec<(String, i64)> {
        vec![
            ("batching_delay_ms".into(), self.batching_delay.as_millis() as i64),
            (
                "registration_timeout_ms".into(),
                self.registration_timeout.as_millis() as i64,
            ),
            (
                "initial_poll_interval_ms".into(),
                self.initial_poll_interval.as_millis() as i64,
            ),
            (
                "initial_heartbeat_interval_ms".into(),
                self.initial_heartbeat_interval.as_millis() as i64,
            ),
        ]
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
