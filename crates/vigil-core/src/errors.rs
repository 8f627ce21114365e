//! Error types for the vigil client engine
//!
//! Recoverable protocol errors (malformed inbound messages, token or nonce
//! mismatches) are absorbed by the engine and counted in [`crate::Statistics`];
//! the error types here surface only at the API boundary.

// ----------------------------------------------------------------------------
// Validation Errors
// ----------------------------------------------------------------------------

/// Structural defects in an inbound or outbound protocol message
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("message could not be decoded: {reason}")]
    Undecodable { reason: String },
    #[error("object-control message is missing a session token")]
    MissingToken,
    #[error("client-id assignment response is missing a nonce")]
    MissingNonce,
    #[error("client-id assignment response carries an empty client id")]
    EmptyClientId,
    #[error("session message is missing a session token")]
    MissingSessionToken,
    #[error("client-id invalidation is missing a client id")]
    MissingClientId,
    #[error("repeated field exceeds the allowed size ({actual} > {max})")]
    OversizedRepeatedField { actual: usize, max: usize },
}

// ----------------------------------------------------------------------------
// Engine Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by the vigil client engine
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// A non-recoverable internal invariant was violated; the engine has
    /// ceased operation.
    #[error("internal invariant violated: {details}")]
    InternalInvariant { details: String },
}

impl VigilError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        VigilError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an internal invariant violation
    pub fn invariant<T: Into<String>>(details: T) -> Self {
        VigilError::InternalInvariant {
            details: details.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::OversizedRepeatedField {
            actual: 5000,
            max: 1024,
        };
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn test_validation_error_converts() {
        fn fails() -> Result<()> {
            Err(ValidationError::MissingToken)?;
            Ok(())
        }
        assert!(matches!(fails(), Err(VigilError::Validation(_))));
    }
}
