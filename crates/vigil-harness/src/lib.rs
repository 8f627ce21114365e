//! vigil Harness
//!
//! Deterministic test support for the vigil client engine: a virtual clock,
//! a recording application listener, an outbound-signal probe, and builders
//! for server messages. Tests drive the engine entirely through its public
//! pump, advancing the clock by hand.

pub mod clock;
pub mod listener;
pub mod messages;

pub use clock::VirtualClock;
pub use listener::{RecordingListener, ResultCollector, SignalProbe};
pub use messages::*;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
