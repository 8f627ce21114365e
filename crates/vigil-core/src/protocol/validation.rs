//! Structural validation of inbound server messages
//!
//! Messages that fail validation never reach the engine: they are counted
//! and dropped, and the client does not respond to them.

use tracing::debug;

use crate::errors::ValidationError;
use crate::protocol::messages::{ServerMessageType, ServerToClientMessage};

/// Upper bound on any repeated field in one message
const MAX_REPEATED_FIELD: usize = 1024;

// ----------------------------------------------------------------------------
// Message Validator
// ----------------------------------------------------------------------------

/// Checks inbound messages for structural well-formedness
#[derive(Debug, Default)]
pub struct MessageValidator;

impl MessageValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate one inbound message
    pub fn validate(&self, message: &ServerToClientMessage) -> Result<(), ValidationError> {
        if message.invalidations.len() > MAX_REPEATED_FIELD {
            return Err(ValidationError::OversizedRepeatedField {
                actual: message.invalidations.len(),
                max: MAX_REPEATED_FIELD,
            });
        }
        if message.registration_results.len() > MAX_REPEATED_FIELD {
            return Err(ValidationError::OversizedRepeatedField {
                actual: message.registration_results.len(),
                max: MAX_REPEATED_FIELD,
            });
        }

        match message.message_type {
            ServerMessageType::ObjectControl => {
                // Every object-control message must carry the session token
                // it claims to be part of.
                if message.session_token.is_none() {
                    return Err(ValidationError::MissingToken);
                }
            }
            ServerMessageType::AssignClientId => {
                if message.nonce.is_none() {
                    return Err(ValidationError::MissingNonce);
                }
                match &message.client_id {
                    None => return Err(ValidationError::EmptyClientId),
                    Some(id) if id.is_empty() => return Err(ValidationError::EmptyClientId),
                    Some(_) => {}
                }
                if message.session_token.is_none() {
                    return Err(ValidationError::MissingSessionToken);
                }
            }
            ServerMessageType::UpdateSession => {
                if message.session_token.is_none() {
                    return Err(ValidationError::MissingSessionToken);
                }
            }
            ServerMessageType::InvalidateSession => {
                if message.session_token.is_none() {
                    return Err(ValidationError::MissingSessionToken);
                }
            }
            ServerMessageType::InvalidateClientId => {
                if message.client_id.is_none() {
                    return Err(ValidationError::MissingClientId);
                }
            }
        }

        debug!(message_type = ?message.message_type, "inbound message validated");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Invalidation, ObjectId};

    #[test]
    fn test_object_control_requires_token() {
        let validator = MessageValidator::new();
        let mut message = ServerToClientMessage::new(ServerMessageType::ObjectControl);

        assert!(matches!(
            validator.validate(&message),
            Err(ValidationError::MissingToken)
        ));

        message.session_token = Some(b"opaque_data".to_vec());
        assert!(validator.validate(&message).is_ok());
    }

    #[test]
    fn test_assign_response_requires_nonce_and_id() {
        let validator = MessageValidator::new();
        let mut message = ServerToClientMessage::new(ServerMessageType::AssignClientId);
        message.session_token = Some(b"opaque_data".to_vec());
        message.client_id = Some(b"uniquifier".to_vec());

        assert!(matches!(
            validator.validate(&message),
            Err(ValidationError::MissingNonce)
        ));

        message.nonce = Some(b"nonce".to_vec());
        assert!(validator.validate(&message).is_ok());

        message.client_id = Some(Vec::new());
        assert!(matches!(
            validator.validate(&message),
            Err(ValidationError::EmptyClientId)
        ));
    }

    #[test]
    fn test_oversized_repeated_field_rejected() {
        let validator = MessageValidator::new();
        let mut message = ServerToClientMessage::new(ServerMessageType::ObjectControl);
        message.session_token = Some(b"opaque_data".to_vec());
        let oid = ObjectId::new(1, b"X".to_vec());
        for version in 0..(MAX_REPEATED_FIELD as i64 + 1) {
            message.invalidations.push(Invalidation::new(oid.clone(), version));
        }

        assert!(matches!(
            validator.validate(&message),
            Err(ValidationError::OversizedRepeatedField { .. })
        ));
    }

    #[test]
    fn test_client_id_invalidation_requires_id() {
        let validator = MessageValidator::new();
        let message = ServerToClientMessage::new(ServerMessageType::InvalidateClientId);

        assert!(matches!(
            validator.validate(&message),
            Err(ValidationError::MissingClientId)
        ));
    }
}
