use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, Checkpoint, Commit, EventStoreError, PartitionKey, Result, SequenceNumber,
    SerializedSnapshot, StoreConfig,
    sequence::{validate_commit, validate_commits},
    store::{
        CheckpointStore, CommitPage, CommitRange, ContinuationToken, EventReader, EventWriter,
        FeedPage, FeedSource, SnapshotReader, SnapshotWriter,
    },
};

#[derive(Default)]
struct StoreState {
    /// Every commit in global append order.
    log: Vec<Commit>,
    /// Log indices per aggregate, in commit order.
    streams: HashMap<AggregateId, Vec<usize>>,
    /// Snapshots per aggregate, keyed by commit sequence number.
    snapshots: HashMap<AggregateId, BTreeMap<SequenceNumber, SerializedSnapshot>>,
}

impl StoreState {
    fn stream_head(&self, aggregate_id: AggregateId) -> (SequenceNumber, SequenceNumber) {
        self.streams
            .get(&aggregate_id)
            .and_then(|indices| indices.last())
            .map(|&i| (self.log[i].sequence_number, self.log[i].last_event_sequence()))
            .unwrap_or_default()
    }
}

/// In-memory event store.
///
/// Implements every storage port plus [`FeedSource`]. The global log is cut
/// into segments of `segment_capacity` commits, standing in for the time
/// partitions of a partition-by-time backend; without a capacity the whole
/// log is one segment.
#[derive(Clone)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<StoreState>>,
    feed_page_size: usize,
    segment_capacity: Option<usize>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates a new empty store with default paging.
    pub fn new() -> Self {
        Self::from_config(&StoreConfig::default())
    }

    /// Creates a new empty store using the paging settings of `config`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            feed_page_size: config.feed_page_size.max(1),
            segment_capacity: config.segment_capacity.filter(|c| *c > 0),
        }
    }

    /// Sets the number of commits per backend feed page.
    pub fn with_feed_page_size(mut self, page_size: usize) -> Self {
        self.feed_page_size = page_size.max(1);
        self
    }

    /// Opens a new segment after every `capacity` commits.
    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.segment_capacity = Some(capacity.max(1));
        self
    }

    /// Returns the total number of commits stored.
    pub async fn commit_count(&self) -> usize {
        self.state.read().await.log.len()
    }

    /// Returns the total number of snapshots stored.
    pub async fn snapshot_count(&self) -> usize {
        self.state
            .read()
            .await
            .snapshots
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Returns up to `max` commits appended after log position `position`,
    /// paired with their own 1-based log positions.
    pub async fn commits_after(&self, position: u64, max: usize) -> Vec<(u64, Commit)> {
        let state = self.state.read().await;
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(state.log.len());
        state.log[start..]
            .iter()
            .take(max)
            .enumerate()
            .map(|(offset, commit)| ((start + offset + 1) as u64, commit.clone()))
            .collect()
    }

    /// Clears all commits and snapshots.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.log.clear();
        state.streams.clear();
        state.snapshots.clear();
    }

    /// Log index range of `partition`, rejecting partitions that have not
    /// been opened yet.
    fn segment_bounds(&self, partition: u64, len: usize) -> Result<(usize, usize)> {
        let unknown = || {
            EventStoreError::InvalidCheckpoint(format!(
                "partition {partition} does not exist ({len} commits stored)"
            ))
        };
        match self.segment_capacity {
            Some(capacity) => {
                let start = usize::try_from(partition)
                    .ok()
                    .and_then(|p| p.checked_mul(capacity))
                    .ok_or_else(unknown)?;
                if partition > 0 && start >= len {
                    return Err(unknown());
                }
                Ok((start.min(len), start.saturating_add(capacity).min(len)))
            }
            None if partition == 0 => Ok((0, len)),
            None => Err(unknown()),
        }
    }
}

#[async_trait]
impl EventWriter for InMemoryEventStore {
    async fn write_commit(&self, commit: Commit) -> Result<()> {
        validate_commit(&commit)?;

        let aggregate_id = commit.aggregate_id;
        let mut state = self.state.write().await;

        let (last_commit, last_event) = state.stream_head(aggregate_id);
        if commit.sequence_number <= last_commit {
            metrics::counter!("event_store_concurrency_conflicts").increment(1);
            return Err(EventStoreError::Concurrency {
                aggregate_id,
                sequence_number: commit.sequence_number,
            });
        }
        validate_commits(
            std::slice::from_ref(&commit),
            aggregate_id,
            last_commit,
            last_event,
        )?;

        let index = state.log.len();
        tracing::debug!(
            %aggregate_id,
            sequence_number = %commit.sequence_number,
            events = commit.event_count(),
            position = index + 1,
            "commit appended"
        );
        state.log.push(commit);
        state.streams.entry(aggregate_id).or_default().push(index);
        metrics::counter!("event_store_commits_written").increment(1);

        Ok(())
    }
}

#[async_trait]
impl EventReader for InMemoryEventStore {
    async fn read_commits(&self, range: CommitRange) -> Result<CommitPage> {
        let state = self.state.read().await;
        let Some(indices) = state.streams.get(&range.aggregate_id) else {
            return Ok(CommitPage::default());
        };

        let mut matching = indices.iter().map(|&i| &state.log[i]).filter(|c| {
            c.partition_key == range.partition_key
                && c.sequence_number >= range.from
                && c.sequence_number <= range.to
        });

        let commits: Vec<Commit> = matching
            .by_ref()
            .take(range.max_items.max(1))
            .cloned()
            .collect();

        let continuation = match (matching.next(), commits.last()) {
            (Some(_), Some(last)) => Some(ContinuationToken::for_range(
                &range.resume_after(last.sequence_number),
            )?),
            _ => None,
        };

        Ok(CommitPage {
            commits,
            continuation,
        })
    }
}

#[async_trait]
impl SnapshotReader for InMemoryEventStore {
    async fn read_snapshot(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
        at_or_below: SequenceNumber,
    ) -> Result<SerializedSnapshot> {
        let state = self.state.read().await;
        let snapshot = state
            .snapshots
            .get(&aggregate_id)
            .and_then(|by_commit| {
                by_commit
                    .range(..=at_or_below)
                    .rev()
                    .map(|(_, snapshot)| snapshot)
                    .find(|snapshot| &snapshot.partition_key == partition_key)
            })
            .cloned();

        Ok(snapshot.unwrap_or_else(|| SerializedSnapshot::empty(aggregate_id, partition_key.clone())))
    }
}

#[async_trait]
impl SnapshotWriter for InMemoryEventStore {
    async fn write_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        if snapshot.is_empty() {
            return Err(EventStoreError::Store(
                "refusing to persist the empty snapshot sentinel".to_string(),
            ));
        }

        let aggregate_id = snapshot.aggregate_id;
        let mut state = self.state.write().await;

        let position = state
            .streams
            .get(&aggregate_id)
            .and_then(|indices| {
                indices
                    .iter()
                    .find(|&&i| state.log[i].sequence_number == snapshot.commit_sequence_number)
            })
            .map(|&i| i + 1)
            .ok_or_else(|| {
                EventStoreError::Store(format!(
                    "snapshot of aggregate {aggregate_id} references unknown commit {}",
                    snapshot.commit_sequence_number
                ))
            })?;

        let by_commit = state.snapshots.entry(aggregate_id).or_default();
        if by_commit.contains_key(&snapshot.commit_sequence_number) {
            return Err(EventStoreError::Concurrency {
                aggregate_id,
                sequence_number: snapshot.commit_sequence_number,
            });
        }

        let snapshot = snapshot.with_store_metadata(serde_json::json!({ "logPosition": position }));
        by_commit.insert(snapshot.commit_sequence_number, snapshot);
        Ok(())
    }
}

#[async_trait]
impl FeedSource for InMemoryEventStore {
    fn source_id(&self) -> &'static str {
        "memory"
    }

    async fn fetch_page(&self, partition: u64, continuation: Option<&str>) -> Result<FeedPage> {
        let offset: usize = match continuation {
            Some(token) => token.parse().map_err(|_| {
                EventStoreError::InvalidCheckpoint(format!("bad page continuation '{token}'"))
            })?,
            None => 0,
        };

        let state = self.state.read().await;
        let (start, end) = self.segment_bounds(partition, state.log.len())?;
        let page_start = start.saturating_add(offset).min(end);
        let page_end = page_start.saturating_add(self.feed_page_size).min(end);
        let commits = state.log[page_start..page_end].to_vec();

        let next = (commits.len() == self.feed_page_size)
            .then(|| offset.saturating_add(self.feed_page_size).to_string());

        Ok(FeedPage { commits, next })
    }

    async fn next_partition(&self, partition: u64) -> Result<Option<u64>> {
        let Some(capacity) = self.segment_capacity else {
            return Ok(None);
        };
        let Some(next) = partition.checked_add(1) else {
            return Ok(None);
        };
        let len = self.state.read().await.log.len();
        let next_start = usize::try_from(next)
            .unwrap_or(usize::MAX)
            .saturating_mul(capacity);
        Ok((len > next_start).then_some(next))
    }
}

/// In-memory checkpoint persistence for feed consumers.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, identity: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(identity.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn read_checkpoint(&self, identity: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(identity).cloned())
    }

    async fn reset_checkpoint(&self, identity: &str) -> Result<()> {
        self.checkpoints.write().await.remove(identity);
        Ok(())
    }
}
