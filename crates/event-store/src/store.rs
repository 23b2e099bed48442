//! Storage ports.
//!
//! The replay engine, the writer and the feed only ever talk to a backend
//! through these traits. All implementations must be thread-safe
//! (Send + Sync); the backing store is the only shared mutable resource.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    AggregateId, Checkpoint, Commit, EventStoreError, FeedFilter, PartitionKey, Result,
    SequenceNumber, SerializedSnapshot,
};

/// An inclusive range of commits to read for one aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    pub aggregate_id: AggregateId,
    pub partition_key: PartitionKey,
    pub from: SequenceNumber,
    pub to: SequenceNumber,
    pub max_items: usize,
}

impl CommitRange {
    pub fn new(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        from: SequenceNumber,
        to: SequenceNumber,
        max_items: usize,
    ) -> Self {
        Self {
            aggregate_id,
            partition_key,
            from,
            to,
            max_items,
        }
    }

    /// The same range, resuming after `last_read`.
    pub fn resume_after(&self, last_read: SequenceNumber) -> Self {
        Self {
            from: last_read.next(),
            ..self.clone()
        }
    }

    /// True when nothing remains to be read.
    pub fn is_exhausted(&self) -> bool {
        self.from > self.to
    }
}

/// Backend-native cursor for continuing a commit read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Encodes the remainder of a range as a token.
    pub fn for_range(range: &CommitRange) -> Result<Self> {
        Ok(Self(serde_json::to_string(range)?))
    }

    /// Decodes the range a token stands for.
    pub fn decode(&self) -> Result<CommitRange> {
        serde_json::from_str(&self.0).map_err(|e| EventStoreError::InvalidContinuation(e.to_string()))
    }

    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of an aggregate's commits.
#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    /// Commits in ascending sequence order.
    pub commits: Vec<Commit>,

    /// Present when more commits remain in the requested range.
    pub continuation: Option<ContinuationToken>,
}

/// Durable, atomic commit append with optimistic concurrency.
#[async_trait]
pub trait EventWriter: Send + Sync {
    /// Appends a commit.
    ///
    /// Fails with [`EventStoreError::Concurrency`] if a commit already holds
    /// `(aggregate_id, sequence_number)`. A commit either lands completely or
    /// not at all.
    async fn write_commit(&self, commit: Commit) -> Result<()>;
}

/// Paged reads of one aggregate's commits.
#[async_trait]
pub trait EventReader: Send + Sync {
    /// Reads up to `range.max_items` commits with sequence numbers in
    /// `[range.from, range.to]`.
    async fn read_commits(&self, range: CommitRange) -> Result<CommitPage>;

    /// Continues a read started by [`EventReader::read_commits`].
    async fn read_commits_from(&self, token: &ContinuationToken) -> Result<CommitPage> {
        self.read_commits(token.decode()?).await
    }
}

/// Reads the latest usable snapshot for an aggregate.
#[async_trait]
pub trait SnapshotReader: Send + Sync {
    /// Returns the latest snapshot with `commit_sequence_number <= at_or_below`,
    /// or the [`SerializedSnapshot::empty`] sentinel.
    async fn read_snapshot(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
        at_or_below: SequenceNumber,
    ) -> Result<SerializedSnapshot>;
}

/// Persists snapshots. Existing snapshots are superseded, never replaced.
#[async_trait]
pub trait SnapshotWriter: Send + Sync {
    async fn write_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()>;
}

/// External persistence of feed progress, used by feed consumers.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, identity: &str, checkpoint: &Checkpoint) -> Result<()>;

    async fn read_checkpoint(&self, identity: &str) -> Result<Option<Checkpoint>>;

    async fn reset_checkpoint(&self, identity: &str) -> Result<()>;
}

/// Commits returned by one feed call plus where to resume.
#[derive(Debug, Clone)]
pub struct FeedBatch {
    pub commits: Vec<Commit>,
    pub checkpoint: Checkpoint,
}

/// The cross-aggregate, resumable ordered view of all commits.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Starts a new feed session.
    async fn get(
        &self,
        filter: FeedFilter,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<FeedBatch>;

    /// Resumes from a checkpoint returned by an earlier call.
    async fn get_from(&self, checkpoint: &Checkpoint, cancel: &CancellationToken)
    -> Result<FeedBatch>;
}

/// One backend page of the global commit log.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    /// Commits in global append order.
    pub commits: Vec<Commit>,

    /// Continuation of the following page; `None` when this page is the
    /// partition's tail.
    pub next: Option<String>,
}

/// Backend side of the cross-aggregate feed.
///
/// The global log is split into partitions (time buckets, segments); a
/// backend without partitioning exposes a single partition `0`. Re-fetching
/// a tail page returns any commits appended since.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Stable id stamped into checkpoints; tokens from other sources are rejected.
    fn source_id(&self) -> &'static str;

    /// Oldest partition still readable.
    async fn first_partition(&self) -> Result<u64> {
        Ok(0)
    }

    /// Fetches the page addressed by `continuation` (`None` = first page).
    async fn fetch_page(&self, partition: u64, continuation: Option<&str>) -> Result<FeedPage>;

    /// The partition after `partition`, once it exists.
    ///
    /// Once this returns `Some`, `partition` receives no further commits.
    async fn next_partition(&self, partition: u64) -> Result<Option<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuation_token_carries_the_remaining_range() {
        let range = CommitRange::new(
            AggregateId::new(),
            PartitionKey::from("p1"),
            SequenceNumber::new(1),
            SequenceNumber::new(10),
            3,
        );
        let rest = range.resume_after(SequenceNumber::new(3));
        let token = ContinuationToken::for_range(&rest).unwrap();

        let decoded = token.decode().unwrap();
        assert_eq!(decoded.from, SequenceNumber::new(4));
        assert_eq!(decoded.to, SequenceNumber::new(10));
        assert_eq!(decoded.max_items, 3);
    }

    #[test]
    fn malformed_continuation_is_rejected() {
        let token = ContinuationToken::from_string("{nope");
        assert!(matches!(
            token.decode(),
            Err(EventStoreError::InvalidContinuation(_))
        ));
    }

    #[test]
    fn range_exhaustion() {
        let range = CommitRange::new(
            AggregateId::new(),
            PartitionKey::from("p1"),
            SequenceNumber::new(5),
            SequenceNumber::new(5),
            10,
        );
        assert!(!range.is_exhausted());
        assert!(range.resume_after(SequenceNumber::new(5)).is_exhausted());
    }
}
