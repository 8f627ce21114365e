//! Protocol implementation: wire messages, validation, framing, and dispatch

pub mod messages;
pub mod validation;

pub(crate) mod handler;

pub use messages::{
    ClientAction, ClientHeader, ClientToServerMessage, InfoMessage, InfoRequest, RegOpType,
    RegistrationOp, RegistrationResult, RegistrationSubtree, RegistrationSyncRequest,
    ServerMessageType, ServerToClientMessage, Status, StatusCode, CLIENT_VERSION, PROTOCOL_VERSION,
};
pub use validation::MessageValidator;
