//! vigil: a client engine for cache-invalidation notification services
//!
//! The service tells clients that named objects have new versions; clients
//! invalidate their local caches in response. Payloads are never
//! transported, only `(object id, version)` pairs. This crate is the
//! client-side protocol engine:
//!
//! - the client lifecycle state machine (identity acquisition, session
//!   switches, recovery from server-side garbage collection),
//! - the registration manager (durable desire to be registered for a set of
//!   objects, retried until acknowledged),
//! - the invalidation delivery pipeline (upcalls with one-shot ack handles;
//!   the upstream ack is held until the application consents),
//! - the outbound shaper (batching, polling, heartbeats, and a dual-window
//!   throttler over a half-duplex message channel),
//! - the inbound dispatcher (validation, token checks, demultiplexing).
//!
//! ## Driving model
//!
//! The engine is a headless, synchronous library. The host owns the clock
//! (via [`TimeSource`]), pushes inbound transport bytes with
//! [`InvalidationClient::handle_inbound_message`], pulls outbound bytes with
//! [`InvalidationClient::take_outbound_message`] when pinged through its
//! [`OutboundListener`], and pumps [`InvalidationClient::run_ready_tasks`]
//! whenever work may be due. All engine state is confined to the pump; ack
//! handles may be invoked from any thread and repost onto it.
//!
//! ```no_run
//! use vigil_core::{
//!     AckHandle, ClientConfig, ClientExternalId, Invalidation, InvalidationClient,
//!     InvalidationListener, ObjectId, SystemTimeSource,
//! };
//!
//! struct CacheListener;
//!
//! impl InvalidationListener for CacheListener {
//!     fn invalidate(&mut self, invalidation: &Invalidation, ack: AckHandle) {
//!         // drop cache entries for invalidation.object_id(), then:
//!         ack.ack();
//!     }
//!     fn invalidate_all(&mut self, ack: AckHandle) { ack.ack(); }
//!     fn registration_lost(&mut self, _object_id: &ObjectId, ack: AckHandle) { ack.ack(); }
//!     fn all_registrations_lost(&mut self, ack: AckHandle) { ack.ack(); }
//! }
//!
//! # fn main() -> Result<(), vigil_core::VigilError> {
//! let mut client = InvalidationClient::new(
//!     SystemTimeSource,
//!     ClientConfig::default(),
//!     ClientExternalId::new(1004, b"my-app".to_vec()),
//!     Box::new(CacheListener),
//! )?;
//! client.start();
//! client.register(&ObjectId::new(4, b"BOOKMARKS".to_vec()), Box::new(|result| {
//!     println!("registration status: {:?}", result.status.code);
//! }));
//! client.run_ready_tasks();
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backoff;
pub mod config;
pub mod digest;
pub mod errors;
pub mod listener;
pub mod persistence;
pub mod protocol;
pub mod statistics;
pub mod throttle;
pub mod types;

mod client;
mod registration;
mod scheduler;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::{InvalidationClient, PersistenceWriter};
pub use config::ClientConfig;
pub use digest::RegistrationSummary;
pub use errors::{Result, ValidationError, VigilError};
pub use listener::{AckHandle, InvalidationListener, OutboundListener, RegistrationCallback};
pub use persistence::PersistentState;
pub use protocol::{
    ClientAction, ClientToServerMessage, RegOpType, RegistrationOp, RegistrationResult,
    ServerMessageType, ServerToClientMessage, Status, StatusCode,
};
pub use statistics::{Counter, Statistics};
pub use throttle::{RateLimit, ThrottleOutcome, Throttler};
pub use types::{
    ClientExternalId, Invalidation, ObjectId, SystemTimeSource, TimeSource, Timestamp,
};
