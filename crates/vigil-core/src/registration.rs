//! Desired-vs-confirmed registration reconciliation
//!
//! The application states what it wants registered; the server confirms what
//! it has. The [`RegistrationManager`] tracks the difference, retries ops the
//! server has not acknowledged, and detects duplicate confirmations by
//! sequence number.

use hashbrown::HashMap;
use tracing::debug;

use crate::listener::RegistrationCallback;
use crate::protocol::messages::{
    RegOpType, RegistrationOp, RegistrationResult, RegistrationSubtree,
};
use crate::types::ObjectId;

// ----------------------------------------------------------------------------
// Registration Entry
// ----------------------------------------------------------------------------

/// One desired registration op and its confirmation state
struct RegistrationEntry {
    op_type: RegOpType,
    sequence_number: u64,
    confirmed: bool,
    /// Taken when the callback fires, so each sequence number reports at
    /// most once
    callback: Option<RegistrationCallback>,
}

// ----------------------------------------------------------------------------
// Apply Outcome
// ----------------------------------------------------------------------------

/// What applying a server registration result amounted to
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    /// The result matched a pending op and was applied
    Applied,
    /// The server dropped a registration the client considered confirmed
    RegistrationLost(ObjectId),
    /// Stale or repeated confirmation; ignored
    Duplicate,
    /// No entry for the object; ignored
    Unknown,
}

// ----------------------------------------------------------------------------
// Registration Manager
// ----------------------------------------------------------------------------

/// Tracks desired registration ops against server confirmations
#[derive(Default)]
pub(crate) struct RegistrationManager {
    entries: HashMap<ObjectId, RegistrationEntry>,
    last_sequence_number: u64,
}

impl RegistrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a desired (un)registration, overriding any earlier op for the
    /// same object. Returns the op to be sent.
    pub fn record_op(
        &mut self,
        object_id: &ObjectId,
        op_type: RegOpType,
        callback: RegistrationCallback,
    ) -> RegistrationOp {
        self.last_sequence_number += 1;
        let op = RegistrationOp {
            object_id: object_id.clone(),
            sequence_number: self.last_sequence_number,
            op_type,
        };
        self.entries.insert(
            object_id.clone(),
            RegistrationEntry {
                op_type,
                sequence_number: self.last_sequence_number,
                confirmed: false,
                callback: Some(callback),
            },
        );
        op
    }

    /// Apply one server verdict
    pub fn apply_result(&mut self, result: &RegistrationResult) -> ApplyOutcome {
        let object_id = &result.operation.object_id;
        let Some(entry) = self.entries.get_mut(object_id) else {
            debug!(%object_id, "registration result for unknown object");
            return ApplyOutcome::Unknown;
        };

        if result.operation.sequence_number != entry.sequence_number
            || result.operation.op_type != entry.op_type
        {
            debug!(%object_id, "stale registration result ignored");
            return ApplyOutcome::Duplicate;
        }

        if entry.confirmed {
            // No client op is pending; a failure here means the server shed
            // the registration on its own.
            if result.status.code.is_success() {
                return ApplyOutcome::Duplicate;
            }
            self.entries.remove(object_id);
            return ApplyOutcome::RegistrationLost(object_id.clone());
        }

        if result.status.code.is_success() {
            if let Some(mut callback) = entry.callback.take() {
                callback(result.clone());
            }
            if entry.op_type == RegOpType::Register {
                entry.confirmed = true;
            } else {
                self.entries.remove(object_id);
            }
            ApplyOutcome::Applied
        } else if result.status.code.is_permanent_failure() {
            if let Some(mut callback) = entry.callback.take() {
                callback(result.clone());
            }
            self.entries.remove(object_id);
            ApplyOutcome::Applied
        } else {
            // Transient failure: the entry stays pending and the retry
            // timer keeps running. The callback holds for a final verdict.
            debug!(%object_id, "transient registration failure, will retry");
            ApplyOutcome::Applied
        }
    }

    /// Ops that have been sent but not confirmed, for resubmission
    pub fn unconfirmed_ops(&self) -> Vec<RegistrationOp> {
        let mut ops: Vec<RegistrationOp> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.confirmed)
            .map(|(object_id, entry)| RegistrationOp {
                object_id: object_id.clone(),
                sequence_number: entry.sequence_number,
                op_type: entry.op_type,
            })
            .collect();
        ops.sort_by_key(|op| op.sequence_number);
        ops
    }

    /// Whether any op awaits confirmation
    pub fn has_unconfirmed(&self) -> bool {
        self.entries.values().any(|entry| !entry.confirmed)
    }

    /// Whether invalidations for this object should be delivered
    pub fn is_registered(&self, object_id: &ObjectId) -> bool {
        self.entries
            .get(object_id)
            .map(|entry| entry.op_type == RegOpType::Register && entry.confirmed)
            .unwrap_or(false)
    }

    /// The confirmed registered object ids
    pub fn confirmed_ids(&self) -> Vec<&ObjectId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.op_type == RegOpType::Register && entry.confirmed)
            .map(|(object_id, _)| object_id)
            .collect()
    }

    /// Mark every entry unconfirmed and return the ops to resend. Used when
    /// a new session keeps the same uniquifier.
    pub fn redrive_all(&mut self) -> Vec<RegistrationOp> {
        for entry in self.entries.values_mut() {
            entry.confirmed = false;
        }
        self.unconfirmed_ops()
    }

    /// Drop every entry and pending callback. Used when the uniquifier
    /// itself is lost.
    pub fn drop_all(&mut self) {
        self.entries.clear();
    }

    /// Shards of the confirmed set for a server sync request
    pub fn subtree_shards(&self, shard_size: usize) -> Vec<RegistrationSubtree> {
        let mut ids: Vec<ObjectId> = self.confirmed_ids().into_iter().cloned().collect();
        ids.sort();
        ids.chunks(shard_size.max(1))
            .map(|chunk| RegistrationSubtree {
                object_ids: chunk.to_vec(),
            })
            .collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{Status, StatusCode};
    use std::sync::{Arc, Mutex};

    fn oid(name: &str) -> ObjectId {
        ObjectId::new(4, name.as_bytes().to_vec())
    }

    fn noop_callback() -> RegistrationCallback {
        Box::new(|_| {})
    }

    fn success_result(op: &RegistrationOp) -> RegistrationResult {
        RegistrationResult {
            operation: op.clone(),
            status: Status::success(),
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut manager = RegistrationManager::new();
        let op1 = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        let op2 = manager.record_op(&oid("HISTORY"), RegOpType::Register, noop_callback());

        assert_eq!(op1.sequence_number, 1);
        assert_eq!(op2.sequence_number, 2);
    }

    #[test]
    fn test_later_op_overrides_earlier() {
        let mut manager = RegistrationManager::new();
        manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        let op = manager.record_op(&oid("BOOKMARKS"), RegOpType::Unregister, noop_callback());

        let pending = manager.unconfirmed_ops();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], op);
        assert_eq!(pending[0].op_type, RegOpType::Unregister);
        assert_eq!(pending[0].sequence_number, 2);
    }

    #[test]
    fn test_success_confirms_and_fires_callback_once() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);

        let mut manager = RegistrationManager::new();
        let op = manager.record_op(
            &oid("BOOKMARKS"),
            RegOpType::Register,
            Box::new(move |result| sink.lock().unwrap().push(result)),
        );

        assert_eq!(manager.apply_result(&success_result(&op)), ApplyOutcome::Applied);
        assert!(manager.is_registered(&oid("BOOKMARKS")));
        assert!(!manager.has_unconfirmed());
        assert_eq!(fired.lock().unwrap().len(), 1);

        // A duplicate confirmation neither fires the callback again nor
        // changes state.
        assert_eq!(
            manager.apply_result(&success_result(&op)),
            ApplyOutcome::Duplicate
        );
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_sequence_number_ignored() {
        let mut manager = RegistrationManager::new();
        let stale = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());

        assert_eq!(
            manager.apply_result(&success_result(&stale)),
            ApplyOutcome::Duplicate
        );
        assert!(manager.has_unconfirmed());
    }

    #[test]
    fn test_permanent_failure_removes_entry() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);

        let mut manager = RegistrationManager::new();
        let op = manager.record_op(
            &oid("BOOKMARKS"),
            RegOpType::Register,
            Box::new(move |result| sink.lock().unwrap().push(result)),
        );

        let result = RegistrationResult {
            operation: op,
            status: Status::new(StatusCode::ObjectUnknown, "no such object"),
        };
        assert_eq!(manager.apply_result(&result), ApplyOutcome::Applied);
        assert!(!manager.is_registered(&oid("BOOKMARKS")));
        assert!(!manager.has_unconfirmed());
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_transient_failure_keeps_entry_pending() {
        let mut manager = RegistrationManager::new();
        let op = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());

        let result = RegistrationResult {
            operation: op,
            status: Status::new(StatusCode::TransientFailure, "try again"),
        };
        assert_eq!(manager.apply_result(&result), ApplyOutcome::Applied);
        assert!(manager.has_unconfirmed());
        assert_eq!(manager.unconfirmed_ops().len(), 1);
    }

    #[test]
    fn test_unregister_success_removes_entry() {
        let mut manager = RegistrationManager::new();
        let reg = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        manager.apply_result(&success_result(&reg));

        let unreg = manager.record_op(&oid("BOOKMARKS"), RegOpType::Unregister, noop_callback());
        manager.apply_result(&success_result(&unreg));

        assert!(!manager.is_registered(&oid("BOOKMARKS")));
        assert!(manager.confirmed_ids().is_empty());
    }

    #[test]
    fn test_server_side_drop_reports_loss() {
        let mut manager = RegistrationManager::new();
        let op = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        manager.apply_result(&success_result(&op));

        let drop_result = RegistrationResult {
            operation: op,
            status: Status::new(StatusCode::PermanentFailure, "shed"),
        };
        assert_eq!(
            manager.apply_result(&drop_result),
            ApplyOutcome::RegistrationLost(oid("BOOKMARKS"))
        );
        assert!(!manager.is_registered(&oid("BOOKMARKS")));
    }

    #[test]
    fn test_redrive_resends_confirmed_ops() {
        let mut manager = RegistrationManager::new();
        let op = manager.record_op(&oid("BOOKMARKS"), RegOpType::Register, noop_callback());
        manager.apply_result(&success_result(&op));
        assert!(!manager.has_unconfirmed());

        let redriven = manager.redrive_all();
        assert_eq!(redriven.len(), 1);
        assert_eq!(redriven[0].sequence_number, op.sequence_number);
        assert!(manager.has_unconfirmed());
        assert!(!manager.is_registered(&oid("BOOKMARKS")));
    }

    #[test]
    fn test_subtree_shards_cover_confirmed_set() {
        let mut manager = RegistrationManager::new();
        for name in ["A", "B", "C"] {
            let op = manager.record_op(&oid(name), RegOpType::Register, noop_callback());
            manager.apply_result(&success_result(&op));
        }

        let shards = manager.subtree_shards(2);
        let total: usize = shards.iter().map(|s| s.object_ids.len()).sum();
        assert_eq!(shards.len(), 2);
        assert_eq!(total, 3);
    }
}
