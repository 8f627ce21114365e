//! The invalidation client engine
//!
//! [`InvalidationClient`] owns all mutable protocol state and is driven by
//! its host as a synchronous pump: inbound bytes and ack-handle invocations
//! enqueue work, and `run_ready_tasks` executes everything that is due
//! against the injected clock. There is no internal thread and no blocking
//! call anywhere in the engine.

use core::time::Duration;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backoff::ExponentialBackoff;
use crate::config::ClientConfig;
use crate::digest::RegistrationSummary;
use crate::errors::{Result, VigilError};
use crate::listener::{AckEvent, AckHandle, InvalidationListener, OutboundListener, RegistrationCallback};
use crate::persistence::PersistentState;
use crate::protocol::handler::{
    ComposeContext, Effect, IdentityDirective, ProtocolHandler, ProtocolListener,
};
use crate::protocol::messages::{
    InfoMessage, InfoRequest, RegOpType, RegistrationResult, ServerMessageType,
    ServerToClientMessage,
};
use crate::registration::{ApplyOutcome, RegistrationManager};
use crate::scheduler::{OperationScheduler, TaskId};
use crate::statistics::{Counter, Statistics};
use crate::throttle::{ThrottleOutcome, Throttler};
use crate::types::{ClientExternalId, Invalidation, ObjectId, TimeSource, Timestamp};

const NONCE_LEN: usize = 16;

/// Confirmed registrations per sync shard
const SYNC_SHARD_SIZE: usize = 64;

/// Identity re-emission backs off up to this factor of the batching delay
const IDENTITY_BACKOFF_FACTOR: u32 = 32;

// ----------------------------------------------------------------------------
// Lifecycle State
// ----------------------------------------------------------------------------

/// Where the client stands in the identity/session lifecycle
#[derive(Debug, Clone)]
enum Lifecycle {
    /// No uniquifier; an assign-client-id request is outstanding
    NoClient,
    /// Uniquifier and session token held; normal operation
    TokenValid {
        uniquifier: Vec<u8>,
        session_token: Vec<u8>,
    },
    /// Uniquifier held but the session was invalidated; an update-session
    /// request is outstanding
    NoSession { uniquifier: Vec<u8> },
}

impl Lifecycle {
    fn state_name(&self) -> &'static str {
        match self {
            Lifecycle::NoClient => "NoClient",
            Lifecycle::TokenValid { .. } => "TokenValid",
            Lifecycle::NoSession { .. } => "NoSession",
        }
    }

    fn session_token(&self) -> Option<&[u8]> {
        match self {
            Lifecycle::TokenValid { session_token, .. } => Some(session_token),
            _ => None,
        }
    }

    fn uniquifier(&self) -> Option<&[u8]> {
        match self {
            Lifecycle::TokenValid { uniquifier, .. } | Lifecycle::NoSession { uniquifier } => {
                Some(uniquifier)
            }
            Lifecycle::NoClient => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Engine (protocol listener)
// ----------------------------------------------------------------------------

/// The state machine behind the protocol handler's fan-out
struct Engine {
    external_id: ClientExternalId,
    lifecycle: Lifecycle,
    /// Whether a token was ever held; decides recovery semantics on the
    /// next identity assignment
    ever_had_token: bool,
    registrations: RegistrationManager,
    listener: Box<dyn InvalidationListener>,
    stats: Arc<Statistics>,
    ack_tx: Sender<AckEvent>,
    /// Invalidations delivered to the application whose acks are still held
    pending_acks: hashbrown::HashSet<Invalidation>,
    identity_backoff: ExponentialBackoff,
    registration_timeout: Duration,
    rng: fastrand::Rng,
}

impl Engine {
    fn ack_handle(&self, event: AckEvent) -> AckHandle {
        AckHandle::new(event, self.ack_tx.clone())
    }

    fn new_nonce(&mut self) -> Vec<u8> {
        (0..NONCE_LEN).map(|_| self.rng.u8(..)).collect()
    }

    fn is_steady(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::TokenValid { .. })
    }

    fn transition(&mut self, next: Lifecycle) {
        info!(from = self.lifecycle.state_name(), to = next.state_name(), "state transition");
        self.lifecycle = next;
    }

    /// Cold or warm start
    fn start(&mut self, restored: Option<PersistentState>) -> Vec<Effect> {
        match restored {
            Some(state) => {
                self.transition(Lifecycle::TokenValid {
                    uniquifier: state.uniquifier,
                    session_token: state.session_token,
                });
                self.ever_had_token = true;
                vec![Effect::EnterSteadyState]
            }
            None => {
                let nonce = self.new_nonce();
                vec![Effect::SendInitialize { nonce }, Effect::SignalOutbound]
            }
        }
    }

    fn register_op(
        &mut self,
        object_id: &ObjectId,
        op_type: RegOpType,
        callback: RegistrationCallback,
    ) -> Vec<Effect> {
        let op = self.registrations.record_op(object_id, op_type, callback);
        vec![
            Effect::SendRegistrations(vec![op]),
            Effect::ScheduleTask(TaskId::RegistrationRetry, self.registration_timeout),
        ]
    }

    /// The registration-retry timer fired
    fn on_registration_retry(&mut self) -> Vec<Effect> {
        let ops = self.registrations.unconfirmed_ops();
        if ops.is_empty() {
            return Vec::new();
        }
        // Hold resends while the uniquifier is being reacquired; the retry
        // timer keeps running so the ops go out once identity is settled.
        if !self.is_steady() {
            return vec![Effect::ScheduleTask(
                TaskId::RegistrationRetry,
                self.registration_timeout,
            )];
        }
        for _ in &ops {
            self.stats.record(Counter::RegistrationRetry);
        }
        debug!(count = ops.len(), "resubmitting unacknowledged registration ops");
        vec![
            Effect::SendRegistrations(ops),
            Effect::ScheduleTask(TaskId::RegistrationRetry, self.registration_timeout),
        ]
    }

    /// An ack handle was invoked by the application
    fn on_ack_event(&mut self, event: AckEvent) -> Vec<Effect> {
        match event {
            AckEvent::InvalidationAcked(invalidation) => {
                if self.pending_acks.remove(&invalidation) {
                    vec![Effect::SendInvalidationAck(invalidation)]
                } else {
                    debug!(%invalidation, "ack for an invalidation that is not pending");
                    Vec::new()
                }
            }
            AckEvent::InvalidateAllDone => {
                // All prior invalidation state is considered reset.
                self.pending_acks.clear();
                Vec::new()
            }
            AckEvent::RegistrationLostDone(_) | AckEvent::AllRegistrationsLostDone => Vec::new(),
        }
    }

    fn persistent_state(&self, last_known_server_time_ms: u64) -> Option<PersistentState> {
        match &self.lifecycle {
            Lifecycle::TokenValid {
                uniquifier,
                session_token,
            } => Some(PersistentState {
                uniquifier: uniquifier.clone(),
                session_token: session_token.clone(),
                last_known_server_time_ms,
            }),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Token-changing message handling
    // ------------------------------------------------------------------

    fn accept_assignment(&mut self, message: &ServerToClientMessage) -> Vec<Effect> {
        // The validator guarantees these are present.
        let uniquifier = message.client_id.clone().unwrap_or_default();
        let session_token = message.session_token.clone().unwrap_or_default();

        let recovery = self.ever_had_token;
        self.transition(Lifecycle::TokenValid {
            uniquifier,
            session_token,
        });
        self.ever_had_token = true;
        self.identity_backoff.reset();

        if recovery {
            // The old uniquifier's registrations are gone with it.
            self.registrations.drop_all();
            self.pending_acks.clear();
            let handle = self.ack_handle(AckEvent::AllRegistrationsLostDone);
            self.listener.all_registrations_lost(handle);
        }

        vec![Effect::ClearPendingNonce, Effect::EnterSteadyState]
    }

    fn handle_assign_response(
        &mut self,
        message: &ServerToClientMessage,
        now: Timestamp,
    ) -> Vec<Effect> {
        if !matches!(self.lifecycle, Lifecycle::NoClient) {
            debug!("dropping assign-client-id response outside NoClient");
            return Vec::new();
        }
        if !message.status.code.is_success() {
            debug!(code = ?message.status.code, "assign-client-id response failed");
            return self.assign_response_discarded(now);
        }
        if message.external_id.as_ref() != Some(&self.external_id) {
            debug!("dropping assign-client-id response with mismatched external id");
            return self.assign_response_discarded(now);
        }
        self.accept_assignment(message)
    }

    fn handle_update_session(&mut self, message: &ServerToClientMessage) -> Vec<Effect> {
        let Lifecycle::NoSession { uniquifier } = &self.lifecycle else {
            debug!("dropping update-session response outside NoSession");
            self.stats.record(Counter::TokenMismatch);
            return Vec::new();
        };
        if message.client_id.as_deref() != Some(uniquifier.as_slice()) {
            debug!("dropping update-session response for a different client");
            self.stats.record(Counter::TokenMismatch);
            return Vec::new();
        }
        if !message.status.code.is_success() {
            debug!(code = ?message.status.code, "update-session response failed");
            return Vec::new();
        }

        let uniquifier = uniquifier.clone();
        let session_token = message.session_token.clone().unwrap_or_default();
        self.transition(Lifecycle::TokenValid {
            uniquifier,
            session_token,
        });

        // The application must assume its registrations did not survive the
        // old session; meanwhile the desired set is redriven under the new
        // one.
        let handle = self.ack_handle(AckEvent::AllRegistrationsLostDone);
        self.listener.all_registrations_lost(handle);

        let mut effects = vec![Effect::EnterSteadyState];
        let redriven = self.registrations.redrive_all();
        if !redriven.is_empty() {
            effects.push(Effect::SendRegistrations(redriven));
            effects.push(Effect::ScheduleTask(
                TaskId::RegistrationRetry,
                self.registration_timeout,
            ));
        }
        effects
    }

    fn handle_invalidate_session(&mut self, message: &ServerToClientMessage) -> Vec<Effect> {
        let current = self.lifecycle.session_token();
        if current.is_none() || message.session_token.as_deref() != current {
            debug!("dropping session invalidation with mismatched token");
            self.stats.record(Counter::TokenMismatch);
            return Vec::new();
        }

        let uniquifier = self.lifecycle.uniquifier().unwrap_or_default().to_vec();
        self.transition(Lifecycle::NoSession { uniquifier });
        vec![Effect::LeaveSteadyState, Effect::SignalOutbound]
    }

    fn handle_invalidate_client_id(&mut self, message: &ServerToClientMessage) -> Vec<Effect> {
        let current = self.lifecycle.uniquifier();
        if current.is_none() || message.client_id.as_deref() != current {
            debug!("dropping client-id invalidation with mismatched id");
            self.stats.record(Counter::TokenMismatch);
            return Vec::new();
        }

        warn!("server no longer recognizes this client; reacquiring identity");
        self.transition(Lifecycle::NoClient);
        let nonce = self.new_nonce();
        vec![
            Effect::LeaveSteadyState,
            Effect::SendInitialize { nonce },
            Effect::SignalOutbound,
        ]
    }
}

impl ProtocolListener for Engine {
    fn client_token(&self) -> Option<Vec<u8>> {
        self.lifecycle.session_token().map(|token| token.to_vec())
    }

    fn compose_context(&self) -> ComposeContext {
        let identity = match &self.lifecycle {
            Lifecycle::NoClient => IdentityDirective::AcquireIdentity(self.external_id.clone()),
            Lifecycle::NoSession { uniquifier } => IdentityDirective::RefreshSession {
                uniquifier: uniquifier.clone(),
            },
            Lifecycle::TokenValid { .. } => IdentityDirective::Steady,
        };
        ComposeContext {
            token: self.client_token(),
            summary: RegistrationSummary::compute(self.registrations.confirmed_ids()),
            client_type: self.external_id.client_type(),
            identity,
        }
    }

    fn handle_token_changed(
        &mut self,
        message: &ServerToClientMessage,
        now: Timestamp,
    ) -> Vec<Effect> {
        match message.message_type {
            ServerMessageType::AssignClientId => self.handle_assign_response(message, now),
            ServerMessageType::UpdateSession => self.handle_update_session(message),
            ServerMessageType::InvalidateSession => self.handle_invalidate_session(message),
            ServerMessageType::InvalidateClientId => self.handle_invalidate_client_id(message),
            ServerMessageType::ObjectControl => Vec::new(),
        }
    }

    fn assign_response_discarded(&mut self, _now: Timestamp) -> Vec<Effect> {
        if !matches!(self.lifecycle, Lifecycle::NoClient) {
            return Vec::new();
        }
        // Re-emit at the next tick; a string of useless responses backs off.
        let delay = self.identity_backoff.next_delay();
        vec![Effect::ScheduleTask(TaskId::Batching, delay)]
    }

    fn handle_invalidations(
        &mut self,
        invalidations: &[Invalidation],
        invalidate_all: bool,
        _now: Timestamp,
    ) -> Vec<Effect> {
        for invalidation in invalidations {
            if self.registrations.is_registered(invalidation.object_id()) {
                self.pending_acks.insert(invalidation.clone());
                let handle = self.ack_handle(AckEvent::InvalidationAcked(invalidation.clone()));
                self.listener.invalidate(invalidation, handle);
            } else {
                debug!(%invalidation, "dropping invalidation for unregistered object");
            }
        }
        if invalidate_all {
            let handle = self.ack_handle(AckEvent::InvalidateAllDone);
            self.listener.invalidate_all(handle);
        }
        Vec::new()
    }

    fn handle_registration_statuses(
        &mut self,
        results: &[RegistrationResult],
        _now: Timestamp,
    ) -> Vec<Effect> {
        for result in results {
            match self.registrations.apply_result(result) {
                ApplyOutcome::RegistrationLost(object_id) => {
                    let handle = self.ack_handle(AckEvent::RegistrationLostDone(object_id.clone()));
                    self.listener.registration_lost(&object_id, handle);
                }
                ApplyOutcome::Applied | ApplyOutcome::Duplicate | ApplyOutcome::Unknown => {}
            }
        }
        if self.registrations.has_unconfirmed() {
            Vec::new()
        } else {
            vec![Effect::CancelTask(TaskId::RegistrationRetry)]
        }
    }

    fn handle_registration_sync_request(&mut self, _now: Timestamp) -> Vec<Effect> {
        self.registrations
            .subtree_shards(SYNC_SHARD_SIZE)
            .into_iter()
            .map(Effect::SendSubtree)
            .collect()
    }

    fn handle_info_request(&mut self, _request: &InfoRequest, _now: Timestamp) -> Vec<Effect> {
        vec![Effect::SendInfoMessage]
    }

    fn handle_intervals(
        &mut self,
        poll_interval_ms: Option<u64>,
        heartbeat_interval_ms: Option<u64>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(ms) = poll_interval_ms {
            effects.push(Effect::SetPollInterval(ms));
        }
        if let Some(ms) = heartbeat_interval_ms {
            effects.push(Effect::SetHeartbeatInterval(ms));
        }
        effects
    }
}

// ----------------------------------------------------------------------------
// Invalidation Client
// ----------------------------------------------------------------------------

/// Writes the persisted state blob when the engine asks to
pub type PersistenceWriter = Box<dyn FnMut(&[u8]) + Send>;

/// The top-level client engine. See the module docs for the driving model.
pub struct InvalidationClient<T: TimeSource> {
    clock: T,
    config: ClientConfig,
    stats: Arc<Statistics>,
    scheduler: OperationScheduler,
    throttler: Throttler,
    handler: ProtocolHandler,
    engine: Engine,
    inbound: VecDeque<Vec<u8>>,
    ack_rx: Receiver<AckEvent>,
    outbound_listener: Option<Box<dyn OutboundListener>>,
    persistence_writer: Option<PersistenceWriter>,
    restored: Option<PersistentState>,
    /// Current poll interval; the server's last advertised value wins
    poll_interval: Duration,
    /// Current heartbeat interval; the server's last advertised value wins
    heartbeat_interval: Duration,
    last_poll: Timestamp,
    last_heartbeat: Timestamp,
}

impl<T: TimeSource> InvalidationClient<T> {
    /// Create a cold-start client
    pub fn new(
        clock: T,
        config: ClientConfig,
        external_id: ClientExternalId,
        listener: Box<dyn InvalidationListener>,
    ) -> Result<Self> {
        Self::build(clock, config, external_id, listener, None)
    }

    /// Create a client warm-started from a persisted blob. A blob that does
    /// not verify degrades to a cold start.
    pub fn restore(
        clock: T,
        config: ClientConfig,
        external_id: ClientExternalId,
        listener: Box<dyn InvalidationListener>,
        blob: &[u8],
    ) -> Result<Self> {
        let restored = PersistentState::deserialize(blob);
        Self::build(clock, config, external_id, listener, restored)
    }

    fn build(
        clock: T,
        config: ClientConfig,
        external_id: ClientExternalId,
        listener: Box<dyn InvalidationListener>,
        restored: Option<PersistentState>,
    ) -> Result<Self> {
        config.validate().map_err(VigilError::config_error)?;

        let stats = Arc::new(Statistics::new());
        let (ack_tx, ack_rx) = channel();
        let engine = Engine {
            external_id,
            lifecycle: Lifecycle::NoClient,
            ever_had_token: false,
            registrations: RegistrationManager::new(),
            listener,
            stats: Arc::clone(&stats),
            ack_tx,
            pending_acks: hashbrown::HashSet::new(),
            identity_backoff: ExponentialBackoff::new(
                config.batching_delay,
                IDENTITY_BACKOFF_FACTOR,
                config.rng_seed ^ 0x5bd1_e995,
            ),
            registration_timeout: config.registration_timeout,
            rng: fastrand::Rng::with_seed(config.rng_seed),
        };

        let now = clock.now();
        Ok(Self {
            throttler: Throttler::new(config.throttle_limits.clone()),
            poll_interval: config.initial_poll_interval,
            heartbeat_interval: config.initial_heartbeat_interval,
            clock,
            config,
            stats,
            scheduler: OperationScheduler::new(),
            handler: ProtocolHandler::new(),
            engine,
            inbound: VecDeque::new(),
            ack_rx,
            outbound_listener: None,
            persistence_writer: None,
            restored,
            last_poll: now,
            last_heartbeat: now,
        })
    }

    /// Begin operation: acquire an identity, or resume a restored one
    pub fn start(&mut self) {
        let restored = self.restored.take();
        let effects = self.engine.start(restored);
        self.apply_effects(effects);
    }

    /// Register the host callback pinged when an outbound message is ready
    pub fn register_outbound_listener(&mut self, listener: Box<dyn OutboundListener>) {
        self.outbound_listener = Some(listener);
    }

    /// Install a writer for the persisted state blob
    pub fn set_persistence_writer(&mut self, writer: PersistenceWriter) {
        self.persistence_writer = Some(writer);
    }

    /// Event counters
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Ask to be notified when `object_id` changes. The callback fires with
    /// the server's verdict.
    pub fn register(&mut self, object_id: &ObjectId, callback: RegistrationCallback) {
        let effects = self.engine.register_op(object_id, RegOpType::Register, callback);
        self.apply_effects(effects);
    }

    /// Stop being notified about `object_id`
    pub fn unregister(&mut self, object_id: &ObjectId, callback: RegistrationCallback) {
        let effects = self
            .engine
            .register_op(object_id, RegOpType::Unregister, callback);
        self.apply_effects(effects);
    }

    /// Accept one serialized message from the transport. Returns
    /// immediately; the bytes are processed on the next pump.
    pub fn handle_inbound_message(&mut self, bytes: &[u8]) {
        self.inbound.push_back(bytes.to_vec());
    }

    /// Compose and take the outbound message. When nothing is pending the
    /// result is a bare header message with no action.
    pub fn take_outbound_message(&mut self) -> Result<Vec<u8>> {
        let ctx = self.engine.compose_context();
        let message = self.handler.compose(ctx, &self.stats);
        message.encode()
    }

    /// Run everything that is ready: posted acks, queued inbound messages,
    /// and named tasks that have come due on the injected clock.
    pub fn run_ready_tasks(&mut self) {
        loop {
            let mut progressed = false;

            while let Ok(event) = self.ack_rx.try_recv() {
                let effects = self.engine.on_ack_event(event);
                self.apply_effects(effects);
                progressed = true;
            }

            while let Some(bytes) = self.inbound.pop_front() {
                let now = self.clock.now();
                let effects =
                    self.handler
                        .handle_incoming(&bytes, now, &mut self.engine, &self.stats);
                self.apply_effects(effects);
                progressed = true;
            }

            let now = self.clock.now();
            let due = self.scheduler.take_due(now);
            for task in due {
                self.dispatch_task(task, now);
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal machinery
    // ------------------------------------------------------------------

    fn dispatch_task(&mut self, task: TaskId, now: Timestamp) {
        match task {
            TaskId::Batching => {
                if self.handler.has_pending_items() || !self.engine.is_steady() {
                    self.signal_outbound(now);
                }
            }
            TaskId::Heartbeat => {
                self.last_heartbeat = now;
                self.scheduler
                    .reschedule_at(TaskId::Heartbeat, now.plus(self.heartbeat_interval));
                self.signal_outbound(now);
            }
            TaskId::Poll => {
                if self.engine.is_steady() {
                    self.handler.arm_poll();
                    self.last_poll = now;
                    self.scheduler
                        .reschedule_at(TaskId::Poll, now.plus(self.poll_interval));
                    self.signal_outbound(now);
                }
            }
            TaskId::RegistrationRetry => {
                let effects = self.engine.on_registration_retry();
                self.apply_effects(effects);
            }
            TaskId::Persist => {
                let state = self
                    .engine
                    .persistent_state(self.handler.last_known_server_time_ms());
                if let (Some(state), Some(writer)) = (state, self.persistence_writer.as_mut()) {
                    match state.serialize() {
                        Ok(blob) => writer(&blob),
                        Err(err) => warn!("failed to serialize persistent state: {err}"),
                    }
                }
            }
            TaskId::ThrottleRelease => {
                self.signal_outbound(now);
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        let now = self.clock.now();
        match effect {
            Effect::SignalOutbound => self.signal_outbound(now),
            Effect::SendInitialize { nonce } => {
                self.handler.send_initialize(nonce);
            }
            Effect::SendRegistrations(ops) => {
                self.handler.add_registrations(ops);
                self.scheduler
                    .schedule(&self.clock, TaskId::Batching, self.config.batching_delay);
            }
            Effect::SendInvalidationAck(invalidation) => {
                self.handler.add_invalidation_ack(invalidation);
                self.scheduler
                    .schedule(&self.clock, TaskId::Batching, self.config.batching_delay);
            }
            Effect::SendSubtree(subtree) => {
                self.handler.add_subtree(subtree);
                self.scheduler
                    .schedule(&self.clock, TaskId::Batching, self.config.batching_delay);
            }
            Effect::SendInfoMessage => {
                self.handler.set_info_message(InfoMessage {
                    performance_counters: self.stats.performance_counters(),
                    config_params: self.config.config_params(),
                });
                self.signal_outbound(now);
            }
            Effect::ClearPendingNonce => self.handler.clear_pending_nonce(),
            Effect::EnterSteadyState => {
                self.handler.arm_poll();
                self.last_poll = now;
                self.last_heartbeat = now;
                self.scheduler
                    .reschedule_at(TaskId::Poll, now.plus(self.poll_interval));
                self.scheduler
                    .reschedule_at(TaskId::Heartbeat, now.plus(self.heartbeat_interval));
                self.scheduler
                    .schedule(&self.clock, TaskId::Persist, self.config.persistence_delay);
                self.signal_outbound(now);
            }
            Effect::LeaveSteadyState => {
                self.scheduler.cancel(TaskId::Poll);
                self.handler.clear_poll();
            }
            Effect::SetPollInterval(ms) => {
                self.poll_interval = Duration::from_millis(ms);
                if self.engine.is_steady() {
                    self.scheduler
                        .reschedule_at(TaskId::Poll, self.last_poll.plus(self.poll_interval));
                }
            }
            Effect::SetHeartbeatInterval(ms) => {
                let new_interval = Duration::from_millis(ms);
                let new_due = self.last_heartbeat.plus(new_interval);
                if let Some(old_due) = self.scheduler.due_time(TaskId::Heartbeat) {
                    // Lengthening takes effect immediately; shortening waits
                    // for the in-flight tick.
                    if new_due > old_due {
                        self.scheduler.reschedule_at(TaskId::Heartbeat, new_due);
                    }
                }
                self.heartbeat_interval = new_interval;
            }
            Effect::ScheduleTask(task, delay) => {
                self.scheduler.schedule(&self.clock, task, delay);
            }
            Effect::CancelTask(task) => self.scheduler.cancel(task),
        }
    }

    /// Pass an outbound-ready signal through the throttler
    fn signal_outbound(&mut self, now: Timestamp) {
        match self.throttler.attempt(now) {
            ThrottleOutcome::SendNow => {
                if let Some(listener) = self.outbound_listener.as_mut() {
                    listener.outbound_message_ready();
                }
            }
            ThrottleOutcome::Deferred(at) => {
                self.scheduler.reschedule_at(TaskId::ThrottleRelease, at);
            }
            ThrottleOutcome::AlreadyDeferred => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ClientToServerMessage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullListener;

    impl InvalidationListener for NullListener {
        fn invalidate(&mut self, _invalidation: &Invalidation, ack: AckHandle) {
            ack.ack();
        }
        fn invalidate_all(&mut self, ack: AckHandle) {
            ack.ack();
        }
        fn registration_lost(&mut self, _object_id: &ObjectId, ack: AckHandle) {
            ack.ack();
        }
        fn all_registrations_lost(&mut self, ack: AckHandle) {
            ack.ack();
        }
    }

    struct FixedClock(Arc<Mutex<Timestamp>>);
    impl TimeSource for FixedClock {
        fn now(&self) -> Timestamp {
            *self.0.lock().unwrap()
        }
    }

    fn new_client() -> InvalidationClient<FixedClock> {
        let clock = FixedClock(Arc::new(Mutex::new(Timestamp::new(1_000_000))));
        InvalidationClient::new(
            clock,
            ClientConfig::default(),
            ClientExternalId::new(1004, b"app_name".to_vec()),
            Box::new(NullListener),
        )
        .unwrap()
    }

    #[test]
    fn test_start_requests_identity_assignment() {
        let mut client = new_client();
        client.start();
        client.run_ready_tasks();

        let bytes = client.take_outbound_message().unwrap();
        let message = ClientToServerMessage::decode(&bytes).unwrap();

        assert_eq!(message.action, Some(crate::protocol::messages::ClientAction::AssignClientId));
        assert!(message.nonce.is_some());
        assert!(message.header.client_token.is_none());
        assert!(message.register_operations.is_empty());
        assert!(message.acked_invalidations.is_empty());
    }

    #[test]
    fn test_message_ids_increase() {
        let mut client = new_client();
        client.start();

        let first = ClientToServerMessage::decode(&client.take_outbound_message().unwrap()).unwrap();
        let second =
            ClientToServerMessage::decode(&client.take_outbound_message().unwrap()).unwrap();
        assert!(second.header.message_id > first.header.message_id);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = FixedClock(Arc::new(Mutex::new(Timestamp::new(0))));
        let config = ClientConfig {
            throttle_limits: Vec::new(),
            ..ClientConfig::default()
        };
        let result = InvalidationClient::new(
            clock,
            config,
            ClientExternalId::new(1, b"x".to_vec()),
            Box::new(NullListener),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_corrupt_restore_blob_degrades_to_cold_start() {
        let clock = FixedClock(Arc::new(Mutex::new(Timestamp::new(0))));
        let mut client = InvalidationClient::restore(
            clock,
            ClientConfig::default(),
            ClientExternalId::new(1, b"x".to_vec()),
            Box::new(NullListener),
            b"garbage blob",
        )
        .unwrap();
        client.start();
        client.run_ready_tasks();

        let message =
            ClientToServerMessage::decode(&client.take_outbound_message().unwrap()).unwrap();
        assert_eq!(message.action, Some(crate::protocol::messages::ClientAction::AssignClientId));
    }
}
