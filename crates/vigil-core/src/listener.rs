//! Application-facing callback surfaces
//!
//! The engine talks to its host through three narrow contracts: the
//! [`InvalidationListener`] receives upcalls (each carrying a one-shot
//! [`AckHandle`]), registration calls carry a [`RegistrationCallback`], and
//! the transport side registers an [`OutboundListener`] that is pinged when
//! a composed message is ready to be taken.

use std::sync::mpsc::Sender;

use crate::protocol::messages::RegistrationResult;
use crate::types::{Invalidation, ObjectId};

// ----------------------------------------------------------------------------
// Ack Events
// ----------------------------------------------------------------------------

/// Completion events posted by ack handles back to the engine's pump
#[derive(Debug, Clone)]
pub(crate) enum AckEvent {
    /// The application consented to acknowledging an invalidation upstream
    InvalidationAcked(Invalidation),
    /// The application finished processing an invalidate-all
    InvalidateAllDone,
    /// The application finished processing a single registration loss
    RegistrationLostDone(ObjectId),
    /// The application finished processing a full registration loss
    AllRegistrationsLostDone,
}

// ----------------------------------------------------------------------------
// Ack Handle
// ----------------------------------------------------------------------------

/// One-shot acknowledgement handle delivered with every listener upcall.
///
/// Invoking the handle consumes it and posts the completion back to the
/// engine, which reposts onto its own pump; the handle may therefore be
/// invoked from any thread. Dropping a handle without invoking it is safe:
/// the corresponding invalidation is simply never acknowledged and the
/// server redelivers per its own policy.
#[derive(Debug)]
pub struct AckHandle {
    event: Option<AckEvent>,
    tx: Sender<AckEvent>,
}

impl AckHandle {
    pub(crate) fn new(event: AckEvent, tx: Sender<AckEvent>) -> Self {
        Self {
            event: Some(event),
            tx,
        }
    }

    /// Consume the handle, authorizing the engine to complete the upcall
    pub fn ack(mut self) {
        if let Some(event) = self.event.take() {
            // A disconnected receiver means the engine is gone; nothing to do.
            let _ = self.tx.send(event);
        }
    }
}

// ----------------------------------------------------------------------------
// Listener Contracts
// ----------------------------------------------------------------------------

/// Receives invalidation events from the engine.
///
/// Upcalls arrive on the engine's pump; the listener must not call back into
/// the engine re-entrantly. Each upcall carries a single-use [`AckHandle`].
pub trait InvalidationListener: Send {
    /// A registered object changed; invalidate any cached state for it.
    /// Invoking the handle authorizes the upstream acknowledgement.
    fn invalidate(&mut self, invalidation: &Invalidation, ack: AckHandle);

    /// Everything may have changed; invalidate all cached state
    fn invalidate_all(&mut self, ack: AckHandle);

    /// The server dropped the registration for one object
    fn registration_lost(&mut self, object_id: &ObjectId, ack: AckHandle);

    /// All registrations were lost (session switch or client-id recovery);
    /// the application must re-register for what it still cares about
    fn all_registrations_lost(&mut self, ack: AckHandle);
}

/// Callback invoked with the server's verdict on a registration op.
///
/// Fires at most once per `(object_id, sequence_number)`.
pub type RegistrationCallback = Box<dyn FnMut(RegistrationResult) + Send>;

/// Pinged (through the throttler) when an outbound message is ready to be
/// taken from the engine
pub trait OutboundListener: Send {
    fn outbound_message_ready(&mut self);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_ack_handle_posts_once() {
        let (tx, rx) = channel();
        let handle = AckHandle::new(AckEvent::InvalidateAllDone, tx);

        handle.ack();
        assert!(matches!(rx.try_recv(), Ok(AckEvent::InvalidateAllDone)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_handle_posts_nothing() {
        let (tx, rx) = channel();
        let handle = AckHandle::new(AckEvent::InvalidateAllDone, tx);

        drop(handle);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ack_from_another_thread() {
        let (tx, rx) = channel();
        let inv = Invalidation::new(ObjectId::new(1, b"X".to_vec()), 7);
        let handle = AckHandle::new(AckEvent::InvalidationAcked(inv.clone()), tx);

        std::thread::spawn(move || handle.ack()).join().unwrap();

        match rx.try_recv() {
            Ok(AckEvent::InvalidationAcked(got)) => assert_eq!(got, inv),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
