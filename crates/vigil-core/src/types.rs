//! Core types for the vigil invalidation protocol
//!
//! This module defines the fundamental types used throughout the protocol,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Object Identifier
// ----------------------------------------------------------------------------

/// Identifies an object the application wants invalidation notices for.
///
/// Equality and hashing are structural; two ids naming the same
/// `(source, name)` pair are the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    source: i32,
    name: Vec<u8>,
}

impl ObjectId {
    /// Create a new object id from a source code and a name
    pub fn new(source: i32, name: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// The source code assigned by the notification backend
    pub fn source(&self) -> i32 {
        self.source
    }

    /// The application-chosen object name
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Canonical byte rendering used by the registration digest
    pub(crate) fn digest_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.name.len());
        bytes.extend_from_slice(&self.source.to_be_bytes());
        bytes.extend_from_slice(&self.name);
        bytes
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(&self.name) {
            Ok(name) => write!(f, "Oid({}, {})", self.source, name),
            Err(_) => write!(f, "Oid({}, 0x{})", self.source, hex::encode(&self.name)),
        }
    }
}

// ----------------------------------------------------------------------------
// Invalidation
// ----------------------------------------------------------------------------

/// A notice that an object has a new version.
///
/// Versions are opaque ordered tokens assigned by the server; an
/// acknowledgement is meaningful only against the same
/// `(object_id, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Invalidation {
    object_id: ObjectId,
    version: i64,
    payload: Option<Vec<u8>>,
}

impl Invalidation {
    /// Create an invalidation for an object at a version
    pub fn new(object_id: ObjectId, version: i64) -> Self {
        Self {
            object_id,
            version,
            payload: None,
        }
    }

    /// Attach an opaque payload supplied by the server
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// The invalidated object
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    /// The new version of the object
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Optional opaque payload
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Inv({}, v{})", self.object_id, self.version)
    }
}

// ----------------------------------------------------------------------------
// Client External Id
// ----------------------------------------------------------------------------

/// Application-supplied identity, stable for the lifetime of the process.
///
/// The server echoes this back when assigning a uniquifier; a response whose
/// echoed external id does not match is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientExternalId {
    client_type: i32,
    app_client_id: Vec<u8>,
}

impl ClientExternalId {
    /// Create an external id from a client type code and an app client id
    pub fn new(client_type: i32, app_client_id: impl Into<Vec<u8>>) -> Self {
        Self {
            client_type,
            app_client_id: app_client_id.into(),
        }
    }

    /// Client type code assigned by the notification backend
    pub fn client_type(&self) -> i32 {
        self.client_type
    }

    /// Application-specific client id
    pub fn app_client_id(&self) -> &[u8] {
        &self.app_client_id
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp on the host's monotonic clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp advanced by a duration
    pub fn plus(&self, delta: core::time::Duration) -> Self {
        Self(self.0.saturating_add(delta.as_millis() as u64))
    }

    /// Milliseconds elapsed since an earlier timestamp (saturating)
    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps.
///
/// The engine never reads the system clock directly; the host injects a
/// time source at construction, which lets tests drive the engine under a
/// virtual clock. Implementations must be non-decreasing.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// System clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(duration.as_millis() as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_structural_equality() {
        let a = ObjectId::new(4, b"BOOKMARKS".to_vec());
        let b = ObjectId::new(4, b"BOOKMARKS".to_vec());
        let c = ObjectId::new(4, b"HISTORY".to_vec());

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invalidation_identity_includes_version() {
        let oid = ObjectId::new(4, b"BOOKMARKS".to_vec());
        let v5 = Invalidation::new(oid.clone(), 5);
        let v6 = Invalidation::new(oid, 6);

        assert_ne!(v5, v6);
        assert_eq!(v5.version(), 5);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::new(1000);
        let later = t.plus(core::time::Duration::from_millis(500));

        assert_eq!(later.as_millis(), 1500);
        assert_eq!(later.since(t), 500);
        assert_eq!(t.since(later), 0); // saturating
    }

    #[test]
    fn test_object_id_digest_bytes_distinct() {
        let a = ObjectId::new(1, b"ab".to_vec());
        let b = ObjectId::new(1, b"ac".to_vec());
        assert_ne!(a.digest_bytes(), b.digest_bytes());
    }
}
