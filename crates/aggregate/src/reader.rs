//! Aggregate rehydration: latest snapshot, then every commit after it.

use common::{AggregateId, PartitionKey};
use event_store::{
    CancellationToken, CommitRange, EventReader, SequenceNumber, SnapshotReader, StoreConfig,
};

use crate::{
    Aggregate, AggregateState,
    error::{AggregateError, Result},
};

/// How far and in what batch size to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Last commit to include; `None` reads to the most recent durable commit.
    pub bound: Option<SequenceNumber>,

    /// Commits fetched per store round-trip.
    pub page_size: usize,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the page size configured for the store.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            bound: None,
            page_size: config.read_page_size.max(1),
        }
    }

    /// Stops the replay at commit `bound`.
    pub fn up_to(mut self, bound: SequenceNumber) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// Rebuilds aggregates from a snapshot store and a commit store.
///
/// Nothing is cached between calls: every read starts from a fresh snapshot
/// read and a fresh commit read.
#[derive(Clone)]
pub struct AggregateReader<R, S> {
    commits: R,
    snapshots: S,
}

impl<R, S> AggregateReader<R, S>
where
    R: EventReader,
    S: SnapshotReader,
{
    pub fn new(commits: R, snapshots: S) -> Self {
        Self { commits, snapshots }
    }

    /// Loads an aggregate as of `options.bound`.
    ///
    /// The result reflects every commit up to the bound exactly once. An
    /// aggregate with no history comes back [`Phase::Fresh`](crate::Phase).
    /// On cancellation the partially replayed state is discarded.
    #[tracing::instrument(skip(self, options, cancel), fields(aggregate_type = A::aggregate_type()))]
    pub async fn read<A: Aggregate>(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
        options: ReadOptions,
        cancel: &CancellationToken,
    ) -> Result<AggregateState<A>> {
        let bound = options.bound.unwrap_or(SequenceNumber::MAX);

        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }
        let snapshot = self
            .snapshots
            .read_snapshot(aggregate_id, partition_key, bound)
            .await?;
        if snapshot.aggregate_id != aggregate_id {
            return Err(AggregateError::SnapshotMismatch {
                expected: aggregate_id,
                actual: snapshot.aggregate_id,
            });
        }

        let mut state = AggregateState::<A>::create_from(snapshot)?;
        if state.commit_sequence_number() >= bound {
            return Ok(state.into_current());
        }

        let range = CommitRange::new(
            aggregate_id,
            partition_key.clone(),
            state.commit_sequence_number().next(),
            bound,
            options.page_size.max(1),
        );

        let mut replayed = 0u64;
        if cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }
        let mut page = self.commits.read_commits(range).await?;
        loop {
            state = state.apply_commits(&page.commits)?;
            replayed += page.commits.len() as u64;
            tracing::debug!(
                commits = page.commits.len(),
                commit_sequence_number = %state.commit_sequence_number(),
                "applied commit page"
            );

            let Some(token) = page.continuation else {
                break;
            };
            if state.commit_sequence_number() >= bound {
                break;
            }
            if cancel.is_cancelled() {
                return Err(AggregateError::Cancelled);
            }
            page = self.commits.read_commits_from(&token).await?;
        }

        metrics::counter!("aggregate_commits_replayed").increment(replayed);
        Ok(state.into_current())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use event_store::{
        EventWriter, InMemoryEventStore, SerializedSnapshot, SnapshotWriter,
    };

    use super::*;
    use crate::{
        Phase,
        test_support::{Counter, increment_commit},
    };

    fn reader(store: &InMemoryEventStore) -> AggregateReader<InMemoryEventStore, InMemoryEventStore> {
        AggregateReader::new(store.clone(), store.clone())
    }

    async fn seed(store: &InMemoryEventStore, id: AggregateId, pk: &PartitionKey, commits: i64) {
        for seq in 1..=commits {
            store
                .write_commit(increment_commit(id, pk, seq, seq, 1))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_read_unknown_aggregate_is_fresh() {
        let store = InMemoryEventStore::new();
        let state: AggregateState<Counter> = reader(&store)
            .read(
                AggregateId::new(),
                &PartitionKey::from("p1"),
                ReadOptions::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state.phase(), Phase::Fresh);
        assert_eq!(state.commit_sequence_number(), SequenceNumber::initial());
    }

    #[tokio::test]
    async fn test_read_pages_through_all_commits() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let pk = PartitionKey::from("p1");
        seed(&store, id, &pk, 7).await;

        let state: AggregateState<Counter> = reader(&store)
            .read(id, &pk, ReadOptions::new().page_size(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.commit_sequence_number(), SequenceNumber::new(7));
        assert_eq!(state.memento().value, 7);
        assert_eq!(state.phase(), Phase::Current);
    }

    #[tokio::test]
    async fn test_read_respects_bound() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let pk = PartitionKey::from("p1");
        seed(&store, id, &pk, 5).await;

        let state: AggregateState<Counter> = reader(&store)
            .read(
                id,
                &pk,
                ReadOptions::new().up_to(SequenceNumber::new(3)).page_size(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state.commit_sequence_number(), SequenceNumber::new(3));
        assert_eq!(state.memento().value, 3);
    }

    #[tokio::test]
    async fn test_read_starts_after_snapshot() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let pk = PartitionKey::from("p1");
        seed(&store, id, &pk, 4).await;

        // A snapshot whose memento disagrees with history proves it was used.
        let snapshot = SerializedSnapshot::from_state(
            id,
            pk.clone(),
            SequenceNumber::new(2),
            SequenceNumber::new(2),
            Utc::now(),
            &Counter {
                value: 100,
                applied: 2,
            },
        )
        .unwrap();
        store.write_snapshot(snapshot).await.unwrap();

        let state: AggregateState<Counter> = reader(&store)
            .read(id, &pk, ReadOptions::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.memento().value, 102);
        assert_eq!(state.memento().applied, 4);
        assert_eq!(state.commit_sequence_number(), SequenceNumber::new(4));
    }

    #[tokio::test]
    async fn test_read_honours_cancellation() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let pk = PartitionKey::from("p1");
        seed(&store, id, &pk, 2).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<AggregateState<Counter>> = reader(&store)
            .read(id, &pk, ReadOptions::new(), &cancel)
            .await;
        assert!(matches!(result, Err(AggregateError::Cancelled)));
    }

    #[test]
    fn test_read_options_defaults() {
        let options = ReadOptions::default();
        assert_eq!(options.bound, None);
        assert_eq!(options.page_size, 100);
        assert_eq!(ReadOptions::new().page_size(0).page_size, 1);
    }
}
