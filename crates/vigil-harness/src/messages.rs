//! Builders for server-side protocol messages
//!
//! Tests play the server: these helpers build the responses a real
//! invalidation service would send, echoing the request fields the protocol
//! requires.

use vigil_core::{
    ClientToServerMessage, Invalidation, RegistrationOp, RegistrationResult, ServerMessageType,
    ServerToClientMessage, Status, StatusCode,
};

/// A successful assign-client-id response echoing the request's nonce and
/// external id
pub fn assign_client_id_response(
    request: &ClientToServerMessage,
    uniquifier: &[u8],
    session_token: &[u8],
) -> ServerToClientMessage {
    let mut response = ServerToClientMessage::new(ServerMessageType::AssignClientId);
    response.nonce = request.nonce.clone();
    response.external_id = request.external_id.clone();
    response.client_id = Some(uniquifier.to_vec());
    response.session_token = Some(session_token.to_vec());
    response
}

/// A bare object-control message carrying the session token
pub fn object_control(session_token: &[u8]) -> ServerToClientMessage {
    let mut message = ServerToClientMessage::new(ServerMessageType::ObjectControl);
    message.session_token = Some(session_token.to_vec());
    message
}

/// An object-control message confirming each op with the given status code
pub fn registration_statuses(
    session_token: &[u8],
    ops: &[RegistrationOp],
    code: StatusCode,
) -> ServerToClientMessage {
    let mut message = object_control(session_token);
    message.registration_results = ops
        .iter()
        .map(|op| RegistrationResult {
            operation: op.clone(),
            status: Status {
                code,
                description: None,
            },
        })
        .collect();
    message
}

/// An object-control message delivering invalidations
pub fn invalidations(
    session_token: &[u8],
    invalidations: Vec<Invalidation>,
) -> ServerToClientMessage {
    let mut message = object_control(session_token);
    message.invalidations = invalidations;
    message
}

/// A session invalidation for the given token
pub fn invalidate_session(session_token: &[u8]) -> ServerToClientMessage {
    let mut message = ServerToClientMessage::new(ServerMessageType::InvalidateSession);
    message.session_token = Some(session_token.to_vec());
    message.status = Status::new(StatusCode::InvalidSession, "session invalidated");
    message
}

/// A successful update-session response carrying the new token
pub fn update_session_response(uniquifier: &[u8], session_token: &[u8]) -> ServerToClientMessage {
    let mut message = ServerToClientMessage::new(ServerMessageType::UpdateSession);
    message.client_id = Some(uniquifier.to_vec());
    message.session_token = Some(session_token.to_vec());
    message
}

/// A client-id invalidation (server-side garbage collection)
pub fn invalidate_client_id(uniquifier: &[u8], session_token: &[u8]) -> ServerToClientMessage {
    let mut message = ServerToClientMessage::new(ServerMessageType::InvalidateClientId);
    message.client_id = Some(uniquifier.to_vec());
    message.session_token = Some(session_token.to_vec());
    message.status = Status::new(StatusCode::UnknownClient, "client not recognized");
    message
}

/// Serialize a server message for the transport
pub fn encode(message: &ServerToClientMessage) -> Vec<u8> {
    message.encode().expect("server message must serialize")
}
