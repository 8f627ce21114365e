//! Registration summary digests
//!
//! The client reports a compact digest of its confirmed registration set on
//! every outbound header; the server compares it with its own view to detect
//! divergence. The digest is independent of the order in which the ids were
//! registered.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::ObjectId;

// ----------------------------------------------------------------------------
// Registration Summary
// ----------------------------------------------------------------------------

/// Digest over the set of currently-confirmed registered object ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSummary {
    num_registrations: u32,
    registration_digest: Vec<u8>,
}

impl RegistrationSummary {
    /// Compute the summary for a set of object ids
    pub fn compute<'a, I>(object_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a ObjectId>,
    {
        let mut entries: Vec<Vec<u8>> = object_ids.into_iter().map(|id| id.digest_bytes()).collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update((entry.len() as u32).to_be_bytes());
            hasher.update(entry);
        }

        Self {
            num_registrations: entries.len() as u32,
            registration_digest: hasher.finalize().to_vec(),
        }
    }

    /// Summary of an empty registration set
    pub fn empty() -> Self {
        Self::compute([])
    }

    /// Number of confirmed registrations
    pub fn num_registrations(&self) -> u32 {
        self.num_registrations
    }

    /// Raw digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.registration_digest
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
