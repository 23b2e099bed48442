//! Command execution infrastructure.

use std::sync::Arc;

use common::{AggregateId, PartitionKey};
use event_store::{
    CancellationToken, EventReader, EventWriter, SequenceNumber, SnapshotReader, SnapshotWriter,
};

use crate::{
    Aggregate, AggregateReader, AggregateState, AggregateWriter, NeverSnapshotPolicy, ReadOptions,
    SnapshotPolicy,
    error::{AggregateError, Result},
};

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after the new events were committed.
    pub state: AggregateState<A>,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The aggregate's commit sequence number after the command.
    pub commit_sequence_number: SequenceNumber,
}

/// Load, decide, apply and commit against one store.
///
/// The repository is responsible for:
/// 1. Rehydrating the aggregate (snapshot plus commits)
/// 2. Running the command to produce events
/// 3. Committing the events with optimistic concurrency
/// 4. Snapshotting according to its policy
///
/// A lost race is returned to the caller; it is never retried here.
pub struct Repository<S, A: Aggregate> {
    reader: AggregateReader<S, S>,
    writer: AggregateWriter<S, S>,
    policy: Arc<dyn SnapshotPolicy<A>>,
    read_options: ReadOptions,
    cancel: CancellationToken,
}

impl<S, A> Repository<S, A>
where
    S: EventReader + EventWriter + SnapshotReader + SnapshotWriter + Clone,
    A: Aggregate,
{
    /// Creates a repository that never snapshots.
    pub fn new(store: S) -> Self {
        Self {
            reader: AggregateReader::new(store.clone(), store.clone()),
            writer: AggregateWriter::new(store.clone(), store),
            policy: Arc::new(NeverSnapshotPolicy),
            read_options: ReadOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_snapshot_policy(mut self, policy: impl SnapshotPolicy<A> + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_read_options(mut self, options: ReadOptions) -> Self {
        self.read_options = options;
        self
    }

    /// Every load and commit stops once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Loads the current state of an aggregate.
    pub async fn load(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
    ) -> Result<AggregateState<A>> {
        self.reader
            .read(aggregate_id, partition_key, self.read_options, &self.cancel)
            .await
    }

    /// Loads an aggregate, returning `None` if it has no history.
    pub async fn load_existing(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
    ) -> Result<Option<AggregateState<A>>> {
        let state = self.load(aggregate_id, partition_key).await?;
        if state.commit_sequence_number() == SequenceNumber::initial() {
            Ok(None)
        } else {
            Ok(Some(state))
        }
    }

    /// Executes a command and commits the events it produces.
    ///
    /// `command` sees the current memento and returns the events to append,
    /// or an error that is surfaced as [`AggregateError::Rejected`]. A command
    /// returning no events writes nothing.
    pub async fn execute<F, E>(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
        command: F,
    ) -> Result<CommandResult<A>>
    where
        F: FnOnce(&A) -> std::result::Result<Vec<A::Event>, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let state = self.load(aggregate_id, partition_key).await?;

        let events = command(state.memento()).map_err(|e| AggregateError::Rejected(e.into()))?;
        if events.is_empty() {
            let commit_sequence_number = state.commit_sequence_number();
            return Ok(CommandResult {
                state,
                events,
                commit_sequence_number,
            });
        }

        let mut pending = state;
        for event in &events {
            pending = pending.apply(event.clone())?;
        }

        let state = self
            .writer
            .commit(&pending, None, self.policy.as_ref(), &self.cancel)
            .await?;

        Ok(CommandResult {
            commit_sequence_number: state.commit_sequence_number(),
            state,
            events,
        })
    }
}
