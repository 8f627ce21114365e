//! Wire messages exchanged with the invalidation service
//!
//! Two top-level shapes travel on the transport: [`ClientToServerMessage`]
//! and [`ServerToClientMessage`], serialized with bincode. Field meanings
//! follow the protocol contract; absent optional fields are simply `None`.

use serde::{Deserialize, Serialize};

use crate::digest::RegistrationSummary;
use crate::errors::Result;
use crate::types::{ClientExternalId, Invalidation, ObjectId};

/// Wire protocol revision spoken by this client
pub const PROTOCOL_VERSION: u32 = 1;

/// Client library version reported in outbound headers
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ----------------------------------------------------------------------------
// Status
// ----------------------------------------------------------------------------

/// Server status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    /// Retryable failure; the operation stays pending
    TransientFailure,
    /// Non-retryable failure
    PermanentFailure,
    /// The named object is unknown to the server; non-retryable
    ObjectUnknown,
    /// The presented session token is no longer valid
    InvalidSession,
    /// The server no longer recognizes the client uniquifier
    UnknownClient,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Whether a registration op carrying this code should stop retrying
    pub fn is_permanent_failure(self) -> bool {
        matches!(
            self,
            StatusCode::PermanentFailure | StatusCode::ObjectUnknown | StatusCode::UnknownClient
        )
    }
}

/// Status with an optional human-readable description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub description: Option<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            description: None,
        }
    }

    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Registration Operations
// ----------------------------------------------------------------------------

/// Direction of a registration op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegOpType {
    Register,
    Unregister,
}

/// A single (un)registration request, identified by its sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOp {
    pub object_id: ObjectId,
    pub sequence_number: u64,
    pub op_type: RegOpType,
}

/// The server's verdict on one registration op
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub operation: RegistrationOp,
    pub status: Status,
}

/// One shard of the confirmed registration set, sent in response to a
/// server sync request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationSubtree {
    pub object_ids: Vec<ObjectId>,
}

/// Server request for the client to report its confirmed registrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSyncRequest {}

// ----------------------------------------------------------------------------
// Info Messages
// ----------------------------------------------------------------------------

/// Server request for client telemetry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRequest {
    pub info_types: Vec<i32>,
}

/// Client telemetry: counter and config dumps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    pub performance_counters: Vec<(String, i64)>,
    pub config_params: Vec<(String, i64)>,
}

// ----------------------------------------------------------------------------
// Client → Server
// ----------------------------------------------------------------------------

/// The action a client message asks the server to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAction {
    AssignClientId,
    UpdateSession,
    PollInvalidations,
    ObjectControl,
}

/// Header attached to every client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHeader {
    /// Current session token; absent only while acquiring an identity
    pub client_token: Option<Vec<u8>>,
    pub registration_summary: RegistrationSummary,
    /// Client's view of server time, echoed from the last server message
    pub client_time_ms: u64,
    /// Monotonically increasing per-message id, for debugging
    pub message_id: u64,
    pub client_type: i32,
    pub protocol_version: u32,
    pub client_version: String,
}

/// A message from the client to the invalidation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientToServerMessage {
    pub header: ClientHeader,
    pub action: Option<ClientAction>,
    /// Present on identity requests; the server must echo it
    pub nonce: Option<Vec<u8>>,
    /// Present on session updates and recovery
    pub client_id: Option<Vec<u8>>,
    /// Present on identity requests
    pub external_id: Option<ClientExternalId>,
    pub register_operations: Vec<RegistrationOp>,
    pub acked_invalidations: Vec<Invalidation>,
    pub registration_subtrees: Vec<RegistrationSubtree>,
    pub info_message: Option<InfoMessage>,
}

impl ClientToServerMessage {
    /// Serialize for the transport
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse from transport bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Server → Client
// ----------------------------------------------------------------------------

/// Discriminator for server messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessageType {
    AssignClientId,
    UpdateSession,
    InvalidateSession,
    InvalidateClientId,
    ObjectControl,
}

/// A message from the invalidation service to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerToClientMessage {
    pub message_type: ServerMessageType,
    pub status: Status,
    pub client_id: Option<Vec<u8>>,
    pub session_token: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub external_id: Option<ClientExternalId>,
    pub server_time_ms: Option<u64>,
    pub next_poll_interval_ms: Option<u64>,
    pub next_heartbeat_interval_ms: Option<u64>,
    /// Set when everything the client holds may be stale; delivered to the
    /// application as an invalidate-all
    pub invalidate_all: bool,
    pub invalidations: Vec<Invalidation>,
    pub registration_results: Vec<RegistrationResult>,
    pub registration_sync_request: Option<RegistrationSyncRequest>,
    pub info_request: Option<InfoRequest>,
}

impl ServerToClientMessage {
    /// A bare message of the given type with a success status
    pub fn new(message_type: ServerMessageType) -> Self {
        Self {
            message_type,
            status: Status::success(),
            client_id: None,
            session_token: None,
            nonce: None,
            external_id: None,
            server_time_ms: None,
            next_poll_interval_ms: None,
            next_heartbeat_interval_ms: None,
            invalidate_all: false,
            invalidations: Vec::new(),
            registration_results: Vec::new(),
            registration_sync_request: None,
            info_request: None,
        }
    }

    /// Serialize for the transport
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse from transport bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_roundtrip() {
        let mut message = ServerToClientMessage::new(ServerMessageType::ObjectControl);
        message.session_token = Some(b"opaque_data".to_vec());
        message
            .invalidations
            .push(Invalidation::new(ObjectId::new(4, b"BOOKMARKS".to_vec()), 5));

        let bytes = message.encode().unwrap();
        assert_eq!(ServerToClientMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_client_message_roundtrip() {
        let message = ClientToServerMessage {
            header: ClientHeader {
                client_token: Some(b"opaque_data".to_vec()),
                registration_summary: RegistrationSummary::empty(),
                client_time_ms: 42,
                message_id: 7,
                client_type: 1004,
                protocol_version: PROTOCOL_VERSION,
                client_version: CLIENT_VERSION.to_string(),
            },
            action: Some(ClientAction::PollInvalidations),
            nonce: None,
            client_id: None,
            external_id: None,
            register_operations: vec![RegistrationOp {
                object_id: ObjectId::new(4, b"HISTORY".to_vec()),
                sequence_number: 2,
                op_type: RegOpType::Register,
            }],
            acked_invalidations: Vec::new(),
            registration_subtrees: Vec::new(),
            info_message: None,
        };

        let bytes = message.encode().unwrap();
        assert_eq!(ClientToServerMessage::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(ServerToClientMessage::decode(&[0xFF; 3]).is_err());
    }

    #[test]
    fn test_permanent_failure_classification() {
        assert!(StatusCode::ObjectUnknown.is_permanent_failure());
        assert!(!StatusCode::TransientFailure.is_permanent_failure());
        assert!(!StatusCode::Success.is_permanent_failure());
    }
}
