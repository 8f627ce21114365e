//! Persistent client state
//!
//! A client that can write a small blob across restarts avoids a full
//! identity round trip on startup: the blob carries the uniquifier, the
//! session token, and the last known server time. The blob embeds an
//! authentication code so a corrupted or foreign blob degrades to a cold
//! start instead of poisoning the engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::Result;

// ----------------------------------------------------------------------------
// Persistent State
// ----------------------------------------------------------------------------

/// The state worth carrying across restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub uniquifier: Vec<u8>,
    pub session_token: Vec<u8>,
    pub last_known_server_time_ms: u64,
}

/// Envelope written to storage: the serialized state plus its
/// authentication code
#[derive(Debug, Serialize, Deserialize)]
struct PersistentBlob {
    state: Vec<u8>,
    authentication_code: Vec<u8>,
}

impl PersistentState {
    /// Serialize into an authenticated blob
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let state = bincode::serialize(self)?;
        let authentication_code = mac(&state);
        Ok(bincode::serialize(&PersistentBlob {
            state,
            authentication_code,
        })?)
    }

    /// Parse an authenticated blob. Returns `None` when the blob cannot be
    /// parsed or its authentication code does not verify; the caller treats
    /// that as a cold start.
    pub fn deserialize(blob_bytes: &[u8]) -> Option<Self> {
        let blob: PersistentBlob = match bincode::deserialize(blob_bytes) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to parse persistent state: {err}");
                return None;
            }
        };

        if mac(&blob.state) != blob.authentication_code {
            warn!("persistent state failed its authentication check");
            return None;
        }

        match bincode::deserialize(&blob.state) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("failed to parse persistent state body: {err}");
                None
            }
        }
    }
}

fn mac(state: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"vigil-persistent-state");
    hasher.update(state);
    hasher.finalize().to_vec()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
