//! Makes buffered events durable and takes best-effort snapshots.

use chrono::{DateTime, Utc};
use event_store::{CancellationToken, EventWriter, SnapshotWriter};

use crate::{
    Aggregate, AggregateState, SnapshotPolicy,
    error::{AggregateError, Result},
};

/// Commits aggregates through an [`EventWriter`] and snapshots them through a
/// [`SnapshotWriter`].
#[derive(Clone)]
pub struct AggregateWriter<W, S> {
    commits: W,
    snapshots: S,
}

impl<W, S> AggregateWriter<W, S>
where
    W: EventWriter,
    S: SnapshotWriter,
{
    pub fn new(commits: W, snapshots: S) -> Self {
        Self { commits, snapshots }
    }

    /// Writes the buffered events of `state` as one commit.
    ///
    /// - An empty buffer is a no-op: nothing is written and `state` is
    ///   returned unchanged.
    /// - A lost race surfaces as [`AggregateError::EventStore`] with a
    ///   concurrency error; it is not retried here. Re-read, re-apply and
    ///   commit again.
    /// - After a successful commit `policy` is consulted. A failed snapshot
    ///   write is logged and counted but never returned: the commit is
    ///   already durable.
    ///
    /// `timestamp` stamps the commit and the snapshot (defaults to now).
    #[tracing::instrument(
        skip(self, state, policy, cancel),
        fields(
            aggregate_id = %state.aggregate_id(),
            aggregate_type = A::aggregate_type(),
            pending = state.uncommitted_events().len(),
        )
    )]
    pub async fn commit<A: Aggregate>(
        &self,
        state: &AggregateState<A>,
        timestamp: Option<DateTime<Utc>>,
        policy: &dyn SnapshotPolicy<A>,
        cancel: &CancellationToken,
    ) -> Result<AggregateState<A>> {
        if !state.is_dirty() {
            return Ok(state.clone());
        }
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }

        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let commit = state.pending_commit(timestamp)?;
        self.commits.write_commit(commit.clone()).await?;

        let committed = state.committed(&commit);
        tracing::debug!(
            commit_sequence_number = %committed.commit_sequence_number(),
            event_sequence_number = %committed.event_sequence_number(),
            "commit written"
        );

        if !policy.should_snapshot(&committed, timestamp) {
            return Ok(committed);
        }

        match self.snapshot(&committed, timestamp).await {
            Ok(()) => {
                metrics::counter!("aggregate_snapshots_written").increment(1);
                Ok(committed.snapshotted(timestamp))
            }
            Err(error) => {
                metrics::counter!("aggregate_snapshot_write_failures").increment(1);
                tracing::warn!(
                    aggregate_id = %committed.aggregate_id(),
                    commit_sequence_number = %committed.commit_sequence_number(),
                    %error,
                    "snapshot write failed; continuing without it"
                );
                Ok(committed)
            }
        }
    }

    async fn snapshot<A: Aggregate>(
        &self,
        state: &AggregateState<A>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = state.to_snapshot(timestamp)?;
        self.snapshots.write_snapshot(snapshot).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::{AggregateId, PartitionKey};
    use event_store::{
        EventStoreError, InMemoryEventStore, SequenceNumber, SerializedSnapshot,
    };

    use super::*;
    use crate::{
        AlwaysSnapshotPolicy, NeverSnapshotPolicy, Phase,
        test_support::{Counter, CounterEvent, at},
    };

    #[derive(Clone, Default)]
    struct FailingSnapshots {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SnapshotWriter for FailingSnapshots {
        async fn write_snapshot(&self, _snapshot: SerializedSnapshot) -> event_store::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(EventStoreError::Store("snapshot store unavailable".to_string()))
        }
    }

    fn dirty(events: i64) -> AggregateState<Counter> {
        let mut state = AggregateState::new(AggregateId::new(), PartitionKey::from("p1"));
        for _ in 0..events {
            state = state.apply(CounterEvent::Incremented { by: 1 }).unwrap();
        }
        state
    }

    #[tokio::test]
    async fn test_commit_writes_buffer_and_clears_it() {
        let store = InMemoryEventStore::new();
        let writer = AggregateWriter::new(store.clone(), store.clone());
        let state = dirty(2);

        let committed = writer
            .commit(&state, Some(at(1)), &NeverSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(committed.commit_sequence_number(), SequenceNumber::first());
        assert_eq!(committed.event_sequence_number(), SequenceNumber::new(2));
        assert!(committed.uncommitted_events().is_empty());
        assert_eq!(committed.phase(), Phase::Current);
        assert_eq!(store.commit_count().await, 1);
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_with_empty_buffer_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let writer = AggregateWriter::new(store.clone(), store.clone());
        let state = dirty(0);

        let result = writer
            .commit(&state, None, &AlwaysSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result, state);
        assert_eq!(store.commit_count().await, 0);
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn test_always_policy_writes_snapshot() {
        let store = InMemoryEventStore::new();
        let writer = AggregateWriter::new(store.clone(), store.clone());

        let committed = writer
            .commit(&dirty(3), Some(at(2)), &AlwaysSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.snapshot_count().await, 1);
        assert_eq!(committed.snapshot_sequence_number(), SequenceNumber::first());
        assert_eq!(committed.snapshot_timestamp(), Some(at(2)));
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_swallowed() {
        let store = InMemoryEventStore::new();
        let snapshots = FailingSnapshots::default();
        let writer = AggregateWriter::new(store.clone(), snapshots.clone());

        let committed = writer
            .commit(&dirty(1), None, &AlwaysSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snapshots.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(committed.commit_sequence_number(), SequenceNumber::first());
        assert_eq!(committed.snapshot_sequence_number(), SequenceNumber::initial());
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn test_lost_race_surfaces_concurrency_and_keeps_state() {
        let store = InMemoryEventStore::new();
        let writer = AggregateWriter::new(store.clone(), store.clone());
        let id = AggregateId::new();
        let pk = PartitionKey::from("p1");

        let first = AggregateState::<Counter>::new(id, pk.clone())
            .apply(CounterEvent::Incremented { by: 1 })
            .unwrap();
        let second = AggregateState::<Counter>::new(id, pk)
            .apply(CounterEvent::Reset)
            .unwrap();

        writer
            .commit(&first, None, &NeverSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap();
        let err = writer
            .commit(&second, None, &NeverSnapshotPolicy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_concurrency());
        assert_eq!(second.uncommitted_events().len(), 1);
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_commit_writes_nothing() {
        let store = InMemoryEventStore::new();
        let writer = AggregateWriter::new(store.clone(), store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = writer
            .commit(&dirty(1), None, &NeverSnapshotPolicy, &cancel)
            .await;

        assert!(matches!(result, Err(AggregateError::Cancelled)));
        assert_eq!(store.commit_count().await, 0);
    }
}
