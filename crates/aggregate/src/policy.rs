//! Snapshot policies consulted by the writer after every successful commit.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{Aggregate, AggregateState};

/// Decides whether a freshly committed aggregate should be snapshotted.
pub trait SnapshotPolicy<A: Aggregate>: Send + Sync {
    /// `state` has just been committed at `timestamp`.
    fn should_snapshot(&self, state: &AggregateState<A>, timestamp: DateTime<Utc>) -> bool;
}

/// Snapshot after every commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSnapshotPolicy;

impl<A: Aggregate> SnapshotPolicy<A> for AlwaysSnapshotPolicy {
    fn should_snapshot(&self, _state: &AggregateState<A>, _timestamp: DateTime<Utc>) -> bool {
        true
    }
}

/// Never snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSnapshotPolicy;

impl<A: Aggregate> SnapshotPolicy<A> for NeverSnapshotPolicy {
    fn should_snapshot(&self, _state: &AggregateState<A>, _timestamp: DateTime<Utc>) -> bool {
        false
    }
}

/// Snapshot once `interval` commits have landed since the last known snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CommitCountSnapshotPolicy {
    interval: i64,
}

impl CommitCountSnapshotPolicy {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: i64::from(interval.max(1)),
        }
    }
}

impl Default for CommitCountSnapshotPolicy {
    fn default() -> Self {
        Self::new(100)
    }
}

impl<A: Aggregate> SnapshotPolicy<A> for CommitCountSnapshotPolicy {
    fn should_snapshot(&self, state: &AggregateState<A>, _timestamp: DateTime<Utc>) -> bool {
        state.commit_sequence_number().as_i64() - state.snapshot_sequence_number().as_i64()
            >= self.interval
    }
}

/// Snapshot when at least `interval` has passed since the last known snapshot.
///
/// An aggregate that has never been snapshotted is snapshotted on its first
/// commit.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSnapshotPolicy {
    interval: Duration,
}

impl IntervalSnapshotPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl<A: Aggregate> SnapshotPolicy<A> for IntervalSnapshotPolicy {
    fn should_snapshot(&self, state: &AggregateState<A>, timestamp: DateTime<Utc>) -> bool {
        match state.snapshot_timestamp() {
            None => true,
            Some(last) => (timestamp - last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= self.interval),
        }
    }
}
