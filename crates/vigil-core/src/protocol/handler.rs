//! Outbound framing and inbound dispatch
//!
//! The [`ProtocolHandler`] owns everything that accumulates between outbound
//! messages (pending registrations, invalidation acks, sync subtrees, the
//! retained nonce) and the demux of inbound messages into the engine's
//! [`ProtocolListener`] fan-out. Outbound messages are composed at take time
//! from the pending state; the pending collections are cleared only as part
//! of that handoff.

use core::time::Duration;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::digest::RegistrationSummary;
use crate::protocol::messages::{
    ClientAction, ClientHeader, ClientToServerMessage, InfoMessage, InfoRequest, RegistrationOp,
    RegistrationResult, RegistrationSubtree, ServerMessageType, ServerToClientMessage,
    CLIENT_VERSION, PROTOCOL_VERSION,
};
use crate::protocol::validation::MessageValidator;
use crate::scheduler::TaskId;
use crate::statistics::{Counter, Statistics};
use crate::types::{ClientExternalId, Invalidation, ObjectId, Timestamp};

// ----------------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------------

/// Work the engine asks its surrounding machinery to perform.
///
/// Protocol-listener methods return these instead of calling back into the
/// handler or scheduler, which keeps ownership acyclic: the client shell
/// owns both sides and applies the effects after dispatch.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Request an outbound-ready signal (through the throttler)
    SignalOutbound,
    /// Begin an identity request: retain the nonce and derive the
    /// assign-client-id action until a matching response arrives
    SendInitialize { nonce: Vec<u8> },
    /// Merge ops into the pending-registration map
    SendRegistrations(Vec<RegistrationOp>),
    /// Add an invalidation to the acked set
    SendInvalidationAck(Invalidation),
    /// Add a registration sync shard
    SendSubtree(RegistrationSubtree),
    /// Attach a telemetry message to the next outbound, bypassing batching
    SendInfoMessage,
    /// The retained nonce was consumed by an accepted response
    ClearPendingNonce,
    /// The client acquired a token: arm the first poll and start the
    /// steady-state timers
    EnterSteadyState,
    /// The client lost its token: stop polling
    LeaveSteadyState,
    /// The server advertised a new poll interval (ms)
    SetPollInterval(u64),
    /// The server advertised a new heartbeat interval (ms)
    SetHeartbeatInterval(u64),
    /// Schedule a named task after a delay (no-op if pending)
    ScheduleTask(TaskId, Duration),
    /// Cancel a named task
    CancelTask(TaskId),
}

// ----------------------------------------------------------------------------
// Protocol Listener
// ----------------------------------------------------------------------------

/// How the handler composes the identity-dependent part of a message
#[derive(Debug, Clone)]
pub(crate) enum IdentityDirective {
    /// No uniquifier yet: emit an assign-client-id request
    AcquireIdentity(ClientExternalId),
    /// Uniquifier but no session: emit an update-session request
    RefreshSession { uniquifier: Vec<u8> },
    /// Token held: carry object-control traffic
    Steady,
}

/// Engine-supplied inputs for composing one outbound message
#[derive(Debug, Clone)]
pub(crate) struct ComposeContext {
    pub token: Option<Vec<u8>>,
    pub summary: RegistrationSummary,
    pub client_type: i32,
    pub identity: IdentityDirective,
}

/// The engine-side receiver for demultiplexed inbound messages.
///
/// The handler holds no reference to the engine; the shell passes the
/// listener into each dispatch call, so the handler → engine edge carries
/// no ownership.
pub(crate) trait ProtocolListener {
    /// Current session token, if the client holds one
    fn client_token(&self) -> Option<Vec<u8>>;

    /// Inputs for the next outbound header and identity section
    fn compose_context(&self) -> ComposeContext;

    /// A token-changing message arrived (assign, session update, session
    /// invalidation, or client-id invalidation); its own matching rules
    /// apply
    fn handle_token_changed(
        &mut self,
        message: &ServerToClientMessage,
        now: Timestamp,
    ) -> Vec<Effect>;

    /// An assign-client-id response was discarded before reaching the
    /// engine (nonce mismatch)
    fn assign_response_discarded(&mut self, now: Timestamp) -> Vec<Effect>;

    /// Object-control invalidations arrived
    fn handle_invalidations(
        &mut self,
        invalidations: &[Invalidation],
        invalidate_all: bool,
        now: Timestamp,
    ) -> Vec<Effect>;

    /// Object-control registration verdicts arrived
    fn handle_registration_statuses(
        &mut self,
        results: &[RegistrationResult],
        now: Timestamp,
    ) -> Vec<Effect>;

    /// The server asked for a dump of the confirmed registration set
    fn handle_registration_sync_request(&mut self, now: Timestamp) -> Vec<Effect>;

    /// The server asked for telemetry
    fn handle_info_request(&mut self, request: &InfoRequest, now: Timestamp) -> Vec<Effect>;

    /// The server advertised new poll/heartbeat intervals
    fn handle_intervals(
        &mut self,
        poll_interval_ms: Option<u64>,
        heartbeat_interval_ms: Option<u64>,
    ) -> Vec<Effect>;
}

// ----------------------------------------------------------------------------
// Protocol Handler
// ----------------------------------------------------------------------------

pub(crate) struct ProtocolHandler {
    validator: MessageValidator,
    /// Pending ops keyed by object id so a later op overrides an earlier one
    pending_registrations: HashMap<ObjectId, RegistrationOp>,
    acked_invalidations: HashSet<Invalidation>,
    registration_subtrees: HashSet<RegistrationSubtree>,
    pending_info: Option<InfoMessage>,
    /// One-shot: the next steady-state message carries a poll action
    poll_armed: bool,
    /// Retained until a matching assign-client-id response arrives
    pending_nonce: Option<Vec<u8>>,
    message_id: u64,
    last_known_server_time_ms: u64,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            validator: MessageValidator::new(),
            pending_registrations: HashMap::new(),
            acked_invalidations: HashSet::new(),
            registration_subtrees: HashSet::new(),
            pending_info: None,
            poll_armed: false,
            pending_nonce: None,
            message_id: 0,
            last_known_server_time_ms: 0,
        }
    }

    // ------------------------------------------------------------------
    // Outbound accumulation
    // ------------------------------------------------------------------

    pub fn send_initialize(&mut self, nonce: Vec<u8>) {
        self.pending_nonce = Some(nonce);
    }

    pub fn clear_pending_nonce(&mut self) {
        self.pending_nonce = None;
    }

    pub fn add_registrations(&mut self, ops: Vec<RegistrationOp>) {
        for op in ops {
            self.pending_registrations.insert(op.object_id.clone(), op);
        }
    }

    pub fn add_invalidation_ack(&mut self, invalidation: Invalidation) {
        self.acked_invalidations.insert(invalidation);
    }

    pub fn add_subtree(&mut self, subtree: RegistrationSubtree) {
        self.registration_subtrees.insert(subtree);
    }

    pub fn set_info_message(&mut self, info: InfoMessage) {
        self.pending_info = Some(info);
    }

    pub fn arm_poll(&mut self) {
        self.poll_armed = true;
    }

    pub fn clear_poll(&mut self) {
        self.poll_armed = false;
    }

    /// Whether batched items await a send
    pub fn has_pending_items(&self) -> bool {
        !self.pending_registrations.is_empty()
            || !self.acked_invalidations.is_empty()
            || !self.registration_subtrees.is_empty()
            || self.pending_info.is_some()
    }

    pub fn last_known_server_time_ms(&self) -> u64 {
        self.last_known_server_time_ms
    }

    // ------------------------------------------------------------------
    // Outbound composition
    // ------------------------------------------------------------------

    /// Compose one outbound message from the pending state and clear what
    /// it carries. Called when the host takes the outbound message.
    pub fn compose(&mut self, ctx: ComposeContext, stats: &Statistics) -> ClientToServerMessage {
        self.message_id += 1;
        let header = ClientHeader {
            client_token: ctx.token,
            registration_summary: ctx.summary,
            client_time_ms: self.last_known_server_time_ms,
            message_id: self.message_id,
            client_type: ctx.client_type,
            protocol_version: PROTOCOL_VERSION,
            client_version: CLIENT_VERSION.to_string(),
        };

        let mut message = ClientToServerMessage {
            header,
            action: None,
            nonce: None,
            client_id: None,
            external_id: None,
            register_operations: Vec::new(),
            acked_invalidations: Vec::new(),
            registration_subtrees: Vec::new(),
            info_message: None,
        };

        match ctx.identity {
            IdentityDirective::AcquireIdentity(external_id) => {
                message.action = Some(ClientAction::AssignClientId);
                message.nonce = self.pending_nonce.clone();
                message.external_id = Some(external_id);
            }
            IdentityDirective::RefreshSession { uniquifier } => {
                message.action = Some(ClientAction::UpdateSession);
                message.client_id = Some(uniquifier);
            }
            IdentityDirective::Steady => {
                let mut ops: Vec<RegistrationOp> =
                    self.pending_registrations.drain().map(|(_, op)| op).collect();
                ops.sort_by_key(|op| op.sequence_number);
                message.register_operations = ops;
                message.acked_invalidations = self.acked_invalidations.drain().collect();
                message.registration_subtrees = self.registration_subtrees.drain().collect();
                message.info_message = self.pending_info.take();

                for _ in &message.acked_invalidations {
                    stats.record(Counter::AckedInvalidation);
                }

                let has_object_control = !message.register_operations.is_empty()
                    || !message.acked_invalidations.is_empty()
                    || !message.registration_subtrees.is_empty();
                message.action = if self.poll_armed {
                    self.poll_armed = false;
                    Some(ClientAction::PollInvalidations)
                } else if has_object_control {
                    Some(ClientAction::ObjectControl)
                } else {
                    None
                };
            }
        }

        stats.record(Counter::SentMessage);
        message
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Parse, validate, and demultiplex one inbound message. Malformed or
    /// mismatched messages are counted and dropped without effects.
    pub fn handle_incoming(
        &mut self,
        bytes: &[u8],
        now: Timestamp,
        listener: &mut dyn ProtocolListener,
        stats: &Statistics,
    ) -> Vec<Effect> {
        let message = match ServerToClientMessage::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping undecodable inbound message: {err}");
                stats.record(Counter::ValidationError);
                return Vec::new();
            }
        };

        if let Err(err) = self.validator.validate(&message) {
            warn!("dropping malformed inbound message: {err}");
            stats.record(Counter::ValidationError);
            return Vec::new();
        }

        stats.record(Counter::ReceivedMessage);
        if let Some(server_time_ms) = message.server_time_ms {
            self.last_known_server_time_ms = server_time_ms;
        }

        match message.message_type {
            ServerMessageType::AssignClientId => {
                if self.pending_nonce.is_some() && self.pending_nonce == message.nonce {
                    listener.handle_token_changed(&message, now)
                } else {
                    debug!("dropping assign-client-id response with stale nonce");
                    stats.record(Counter::NonceMismatch);
                    listener.assign_response_discarded(now)
                }
            }
            ServerMessageType::UpdateSession
            | ServerMessageType::InvalidateSession
            | ServerMessageType::InvalidateClientId => listener.handle_token_changed(&message, now),
            ServerMessageType::ObjectControl => {
                if message.session_token != listener.client_token() {
                    debug!("dropping object-control message with mismatched token");
                    stats.record(Counter::TokenMismatch);
                    return Vec::new();
                }

                let mut effects = listener.handle_intervals(
                    message.next_poll_interval_ms,
                    message.next_heartbeat_interval_ms,
                );
                if !message.invalidations.is_empty() || message.invalidate_all {
                    effects.extend(listener.handle_invalidations(
                        &message.invalidations,
                        message.invalidate_all,
                        now,
                    ));
                }
                if !message.registration_results.is_empty() {
                    effects
                        .extend(listener.handle_registration_statuses(&message.registration_results, now));
                }
                if message.registration_sync_request.is_some() {
                    effects.extend(listener.handle_registration_sync_request(now));
                }
                if let Some(request) = &message.info_request {
                    effects.extend(listener.handle_info_request(request, now));
                }
                effects
            }
        }
    }
}
