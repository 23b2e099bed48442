//! All-stream indexer.
//!
//! Merges several commit logs (one per store, region or shard) into a single
//! globally sequenced log. Each round reads a batch from every input, merges
//! the heads in `(timestamp, aggregate id, commit sequence)` order while
//! keeping each input's own order, drops commits already merged within the
//! dedup window, and writes the batch atomically with the input positions it
//! consumed.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{
    CancellationToken, Commit, EventStoreError, FeedPage, FeedSource, InMemoryEventStore,
    SequenceNumber,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::{FeedError, IndexerConfig, Result};

/// A commit as it appears in the merged log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCommit {
    /// Position in the merged log, starting at 1 with no gaps.
    pub global_sequence: u64,

    /// Name of the input the commit was read from.
    pub source: String,

    /// The commit's position in that input.
    pub source_position: u64,

    pub commit: Commit,
}

/// Resumption state, stored alongside the merged log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerState {
    /// Last consumed position per input name.
    pub input_positions: BTreeMap<String, u64>,

    /// Global sequence of the last merged commit.
    pub global_sequence: u64,
}

/// Outcome of one merge round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeRound {
    /// Commits read across all inputs.
    pub read: usize,

    /// Commits appended to the merged log.
    pub merged: usize,

    /// Commits dropped as duplicates.
    pub suppressed: usize,
}

/// A log the indexer reads from.
#[async_trait]
pub trait MergeInput: Send + Sync {
    /// Returns up to `max` commits after `position`, with their own positions
    /// in ascending order.
    async fn read_after(&self, position: u64, max: usize) -> event_store::Result<Vec<(u64, Commit)>>;
}

#[async_trait]
impl MergeInput for InMemoryEventStore {
    async fn read_after(&self, position: u64, max: usize) -> event_store::Result<Vec<(u64, Commit)>> {
        Ok(self.commits_after(position, max).await)
    }
}

/// The merged log the indexer writes to.
#[async_trait]
pub trait MergeOutput: Send + Sync {
    async fn load_state(&self) -> event_store::Result<IndexerState>;

    /// Appends `batch` and stores `state` in one atomic step.
    async fn append_batch(
        &self,
        batch: Vec<MergedCommit>,
        state: &IndexerState,
    ) -> event_store::Result<()>;
}

type DedupKey = (AggregateId, SequenceNumber);

/// Commits merged recently, bounded by age and by count.
#[derive(Debug)]
pub struct SeenWindow {
    window: Duration,
    capacity: usize,
    order: VecDeque<(DedupKey, DateTime<Utc>)>,
    keys: HashSet<DedupKey>,
}

impl SeenWindow {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            keys: HashSet::new(),
        }
    }

    pub fn contains(&self, commit: &Commit) -> bool {
        self.keys.contains(&dedup_key(commit))
    }

    /// Remembers `commit` as merged at `now`, evicting the oldest entries
    /// beyond capacity.
    pub fn insert(&mut self, commit: &Commit, now: DateTime<Utc>) {
        let key = dedup_key(commit);
        if self.keys.insert(key) {
            self.order.push_back((key, now));
        }
        while self.order.len() > self.capacity {
            self.pop_oldest();
        }
    }

    /// Forgets entries older than the window.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        while let Some((_, at)) = self.order.front() {
            let expired = (now - *at)
                .to_std()
                .is_ok_and(|age| age > self.window);
            if !expired {
                break;
            }
            self.pop_oldest();
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn pop_oldest(&mut self) {
        if let Some((key, _)) = self.order.pop_front() {
            self.keys.remove(&key);
        }
    }
}

fn dedup_key(commit: &Commit) -> DedupKey {
    (commit.aggregate_id, commit.sequence_number)
}

fn merge_key(commit: &Commit) -> (DateTime<Utc>, AggregateId, SequenceNumber) {
    (commit.timestamp, commit.aggregate_id, commit.sequence_number)
}

/// Single-writer merger of named inputs into one [`MergeOutput`].
pub struct AllStreamIndexer<O> {
    output: O,
    inputs: Vec<(String, Box<dyn MergeInput>)>,
    config: IndexerConfig,
    seen: Mutex<SeenWindow>,
}

impl<O: MergeOutput> AllStreamIndexer<O> {
    pub fn new(output: O, config: IndexerConfig) -> Self {
        let seen = SeenWindow::new(config.dedup_window, config.dedup_capacity);
        Self {
            output,
            inputs: Vec::new(),
            config,
            seen: Mutex::new(seen),
        }
    }

    /// Adds an input. Names key the stored positions and must stay stable
    /// across restarts.
    pub fn with_input(mut self, name: impl Into<String>, input: impl MergeInput + 'static) -> Self {
        self.inputs.push((name.into(), Box::new(input)));
        self
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Runs one merge round.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<MergeRound> {
        let mut state = self.output.load_state().await?;

        let mut queues: Vec<VecDeque<(u64, Commit)>> = Vec::with_capacity(self.inputs.len());
        for (name, input) in &self.inputs {
            if cancel.is_cancelled() {
                return Err(FeedError::Cancelled);
            }
            let after = state.input_positions.get(name).copied().unwrap_or(0);
            let commits = input.read_after(after, self.config.batch_size).await?;
            queues.push(commits.into());
        }

        let read: usize = queues.iter().map(VecDeque::len).sum();
        if read == 0 {
            return Ok(MergeRound::default());
        }

        let now = Utc::now();
        let mut seen = self.seen.lock().await;
        seen.evict(now);

        let mut batch = Vec::new();
        let mut batch_keys = HashSet::new();
        let mut suppressed = 0;

        while let Some(index) = next_head(&queues) {
            let Some((position, commit)) = queues[index].pop_front() else {
                break;
            };
            let name = &self.inputs[index].0;
            state.input_positions.insert(name.clone(), position);

            if seen.contains(&commit) || !batch_keys.insert(dedup_key(&commit)) {
                suppressed += 1;
                continue;
            }

            state.global_sequence += 1;
            batch.push(MergedCommit {
                global_sequence: state.global_sequence,
                source: name.clone(),
                source_position: position,
                commit,
            });
        }

        let merged = batch.len();
        let committed: Vec<Commit> = batch.iter().map(|m| m.commit.clone()).collect();
        self.output.append_batch(batch, &state).await?;
        for commit in &committed {
            seen.insert(commit, now);
        }

        metrics::counter!("indexer_commits_merged").increment(merged as u64);
        metrics::counter!("indexer_duplicates_suppressed").increment(suppressed as u64);
        tracing::debug!(read, merged, suppressed, "merge round complete");

        Ok(MergeRound {
            read,
            merged,
            suppressed,
        })
    }

    /// Merges until `cancel` fires, sleeping between rounds that read nothing.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(inputs = self.inputs.len(), "all-stream indexer started");
        loop {
            let round = match self.run_once(&cancel).await {
                Ok(round) => round,
                Err(FeedError::Cancelled) => break,
                Err(e) => return Err(e),
            };

            if round.read == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            } else if cancel.is_cancelled() {
                break;
            }
        }
        tracing::info!("all-stream indexer stopped");
        Ok(())
    }
}

/// Index of the queue whose head sorts first.
fn next_head(queues: &[VecDeque<(u64, Commit)>]) -> Option<usize> {
    queues
        .iter()
        .enumerate()
        .filter_map(|(i, q)| q.front().map(|(_, commit)| (i, merge_key(commit))))
        .min_by(|a, b| a.1.cmp(&b.1))
        .map(|(i, _)| i)
}

#[derive(Default)]
struct AllStreamLog {
    merged: Vec<MergedCommit>,
    state: IndexerState,
}

/// In-memory merged log. Readable through [`crate::PagedFeed`].
#[derive(Clone)]
pub struct InMemoryAllStream {
    log: Arc<RwLock<AllStreamLog>>,
    page_size: usize,
}

impl Default for InMemoryAllStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAllStream {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(AllStreamLog::default())),
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.merged.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.merged.is_empty()
    }

    /// Returns a copy of the merged log.
    pub async fn merged(&self) -> Vec<MergedCommit> {
        self.log.read().await.merged.clone()
    }
}

#[async_trait]
impl MergeOutput for InMemoryAllStream {
    async fn load_state(&self) -> event_store::Result<IndexerState> {
        Ok(self.log.read().await.state.clone())
    }

    async fn append_batch(
        &self,
        batch: Vec<MergedCommit>,
        state: &IndexerState,
    ) -> event_store::Result<()> {
        let mut log = self.log.write().await;

        let mut expected = log.state.global_sequence + 1;
        for merged in &batch {
            if merged.global_sequence != expected {
                return Err(EventStoreError::Store(format!(
                    "merged log expected global sequence {expected}, got {}",
                    merged.global_sequence
                )));
            }
            expected += 1;
        }
        if state.global_sequence != expected - 1 {
            return Err(EventStoreError::Store(format!(
                "indexer state at global sequence {}, batch ends at {}",
                state.global_sequence,
                expected - 1
            )));
        }

        log.merged.extend(batch);
        log.state = state.clone();
        Ok(())
    }
}

#[async_trait]
impl FeedSource for InMemoryAllStream {
    fn source_id(&self) -> &'static str {
        "all-stream"
    }

    async fn fetch_page(&self, _partition: u64, continuation: Option<&str>) -> event_store::Result<FeedPage> {
        let offset: usize = match continuation {
            Some(token) => token.parse().map_err(|_| {
                EventStoreError::InvalidCheckpoint(format!("bad page continuation '{token}'"))
            })?,
            None => 0,
        };

        let log = self.log.read().await;
        let start = offset.min(log.merged.len());
        let end = start.saturating_add(self.page_size).min(log.merged.len());
        let commits: Vec<Commit> = log.merged[start..end]
            .iter()
            .map(|m| m.commit.clone())
            .collect();
        let next = (commits.len() == self.page_size).then(|| end.to_string());

        Ok(FeedPage { commits, next })
    }

    async fn next_partition(&self, _partition: u64) -> event_store::Result<Option<u64>> {
        Ok(None)
    }
}
