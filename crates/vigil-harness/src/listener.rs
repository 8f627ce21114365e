//! Recording doubles for the engine's callback surfaces

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vigil_core::{
    AckHandle, Invalidation, InvalidationListener, ObjectId, OutboundListener,
    RegistrationCallback, RegistrationResult,
};

// ----------------------------------------------------------------------------
// Recording Listener
// ----------------------------------------------------------------------------

#[derive(Default)]
struct RecordedEvents {
    /// Invalidations with their (untaken) ack handles; tests ack by hand
    invalidations: Vec<(Invalidation, Option<AckHandle>)>,
    invalidate_all_count: usize,
    all_registrations_lost_count: usize,
    lost_registrations: Vec<ObjectId>,
}

/// An application listener that records everything it is told.
///
/// Single-object invalidations are held without acking so tests control
/// exactly when the upstream ack is authorized; the other upcalls ack
/// immediately.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<RecordedEvents>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of single-object invalidations delivered
    pub fn invalidation_count(&self) -> usize {
        self.events.lock().unwrap().invalidations.len()
    }

    /// The recorded invalidations, without their handles
    pub fn invalidations(&self) -> Vec<Invalidation> {
        self.events
            .lock()
            .unwrap()
            .invalidations
            .iter()
            .map(|(invalidation, _)| invalidation.clone())
            .collect()
    }

    /// Take the ack handle of the i-th delivered invalidation
    pub fn take_ack_handle(&self, index: usize) -> AckHandle {
        self.events.lock().unwrap().invalidations[index]
            .1
            .take()
            .expect("ack handle already taken")
    }

    pub fn invalidate_all_count(&self) -> usize {
        self.events.lock().unwrap().invalidate_all_count
    }

    pub fn all_registrations_lost_count(&self) -> usize {
        self.events.lock().unwrap().all_registrations_lost_count
    }

    pub fn lost_registrations(&self) -> Vec<ObjectId> {
        self.events.lock().unwrap().lost_registrations.clone()
    }
}

impl InvalidationListener for RecordingListener {
    fn invalidate(&mut self, invalidation: &Invalidation, ack: AckHandle) {
        self.events
            .lock()
            .unwrap()
            .invalidations
            .push((invalidation.clone(), Some(ack)));
    }

    fn invalidate_all(&mut self, ack: AckHandle) {
        self.events.lock().unwrap().invalidate_all_count += 1;
        ack.ack();
    }

    fn registration_lost(&mut self, object_id: &ObjectId, ack: AckHandle) {
        self.events
            .lock()
            .unwrap()
            .lost_registrations
            .push(object_id.clone());
        ack.ack();
    }

    fn all_registrations_lost(&mut self, ack: AckHandle) {
        self.events.lock().unwrap().all_registrations_lost_count += 1;
        ack.ack();
    }
}

// ----------------------------------------------------------------------------
// Signal Probe
// ----------------------------------------------------------------------------

/// Records outbound-ready pings from the engine
#[derive(Clone, Default)]
pub struct SignalProbe {
    ready: Arc<AtomicBool>,
    count: Arc<AtomicUsize>,
}

impl SignalProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a ping arrived since the last `clear`
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Reset the ready flag
    pub fn clear(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Total pings observed
    pub fn signal_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl OutboundListener for SignalProbe {
    fn outbound_message_ready(&mut self) {
        self.ready.store(true, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Registration Result Collector
// ----------------------------------------------------------------------------

/// Collects registration callback results across calls
#[derive(Clone, Default)]
pub struct ResultCollector {
    results: Arc<Mutex<Vec<RegistrationResult>>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends into this collector
    pub fn callback(&self) -> RegistrationCallback {
        let results = Arc::clone(&self.results);
        Box::new(move |result| results.lock().unwrap().push(result))
    }

    pub fn results(&self) -> Vec<RegistrationResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
