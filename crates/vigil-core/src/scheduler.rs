//! Named one-shot task scheduling
//!
//! A thin layer between the engine and its host-driven pump: each symbolic
//! task name has at most one scheduled occurrence. Scheduling while an
//! occurrence is pending is a no-op, so the first (earliest) request wins.

use core::time::Duration;
use std::collections::BTreeMap;

use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Task Names
// ----------------------------------------------------------------------------

/// The named tasks the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskId {
    /// Coalesce pending registrations, acks, and sync subtrees into one
    /// outbound signal
    Batching,
    /// Periodic keep-alive send
    Heartbeat,
    /// Periodic invalidation poll
    Poll,
    /// Resubmit unacknowledged registration ops
    RegistrationRetry,
    /// Write the persistent state blob
    Persist,
    /// Retry a throttled outbound signal
    ThrottleRelease,
}

// ----------------------------------------------------------------------------
// Operation Scheduler
// ----------------------------------------------------------------------------

/// Maps task names to at most one scheduled occurrence each
#[derive(Debug, Default)]
pub struct OperationScheduler {
    pending: BTreeMap<TaskId, Timestamp>,
}

impl OperationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run after `delay`. No-op if an occurrence is
    /// already pending.
    pub fn schedule<T: TimeSource>(&mut self, clock: &T, task: TaskId, delay: Duration) {
        let due = clock.now().plus(delay);
        self.pending.entry(task).or_insert(due);
    }

    /// Schedule `task` at an absolute due time, replacing any pending
    /// occurrence. Used when a server-advertised interval changes.
    pub fn reschedule_at(&mut self, task: TaskId, due: Timestamp) {
        self.pending.insert(task, due);
    }

    /// Cancel any pending occurrence of `task`
    pub fn cancel(&mut self, task: TaskId) {
        self.pending.remove(&task);
    }

    /// Whether an occurrence of `task` is pending
    pub fn is_pending(&self, task: TaskId) -> bool {
        self.pending.contains_key(&task)
    }

    /// Due time of a pending occurrence, if any
    pub fn due_time(&self, task: TaskId) -> Option<Timestamp> {
        self.pending.get(&task).copied()
    }

    /// Remove and return every task due at or before `now`, ordered by due
    /// time
    pub fn take_due(&mut self, now: Timestamp) -> Vec<TaskId> {
        let mut due: Vec<(Timestamp, TaskId)> = self
            .pending
            .iter()
            .filter(|(_, &t)| t <= now)
            .map(|(&task, &t)| (t, task))
            .collect();
        due.sort();
        for (_, task) in &due {
            self.pending.remove(task);
        }
        due.into_iter().map(|(_, task)| task).collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(Timestamp);
    impl TimeSource for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn test_schedule_is_idempotent() {
        let clock = FixedClock(Timestamp::new(1000));
        let mut scheduler = OperationScheduler::new();

        scheduler.schedule(&clock, TaskId::Poll, Duration::from_millis(100));
        scheduler.schedule(&clock, TaskId::Poll, Duration::from_millis(5000));

        // The first request wins.
        assert_eq!(scheduler.due_time(TaskId::Poll), Some(Timestamp::new(1100)));
    }

    #[test]
    fn test_take_due_respects_order() {
        let clock = FixedClock(Timestamp::new(0));
        let mut scheduler = OperationScheduler::new();

        scheduler.schedule(&clock, TaskId::Heartbeat, Duration::from_millis(200));
        scheduler.schedule(&clock, TaskId::Batching, Duration::from_millis(100));
        scheduler.schedule(&clock, TaskId::Poll, Duration::from_millis(500));

        let due = scheduler.take_due(Timestamp::new(250));
        assert_eq!(due, vec![TaskId::Batching, TaskId::Heartbeat]);
        assert!(scheduler.is_pending(TaskId::Poll));
        assert!(!scheduler.is_pending(TaskId::Batching));
    }

    #[test]
    fn test_cancel_removes_pending() {
        let clock = FixedClock(Timestamp::new(0));
        let mut scheduler = OperationScheduler::new();

        scheduler.schedule(&clock, TaskId::RegistrationRetry, Duration::from_secs(60));
        scheduler.cancel(TaskId::RegistrationRetry);

        assert!(scheduler.take_due(Timestamp::new(120_000)).is_empty());
    }

    #[test]
    fn test_reschedule_replaces() {
        let clock = FixedClock(Timestamp::new(0));
        let mut scheduler = OperationScheduler::new();

        scheduler.schedule(&clock, TaskId::Poll, Duration::from_secs(60));
        scheduler.reschedule_at(TaskId::Poll, Timestamp::new(10_000));

        assert_eq!(scheduler.due_time(TaskId::Poll), Some(Timestamp::new(10_000)));
    }
}
