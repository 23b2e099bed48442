//! The replay accumulator.
//!
//! [`AggregateState`] folds a snapshot plus an ordered commit stream into the
//! current memento, tracking the last durable commit, the last applied event
//! and the buffer of events not yet committed. Every operation takes `&self`
//! and returns a new value; nothing is mutated in place.

use chrono::{DateTime, Utc};
use common::{AggregateId, PartitionKey};
use event_store::{
    Commit, Event, SequenceNumber, SerializedEvent, SerializedSnapshot, validate_commits,
    validate_events,
};

use crate::{
    Aggregate, DomainEvent,
    error::{AggregateError, Result},
};

/// Lifecycle of one aggregate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot and no events.
    Fresh,
    /// Seeded from a snapshot, history not yet read.
    SnapshotLoaded,
    /// Historical commits are being applied.
    Replaying,
    /// All known commits applied, nothing buffered.
    Current,
    /// At least one uncommitted event is buffered.
    Dirty,
}

/// An aggregate's folded state plus its position in the commit log.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState<A: Aggregate> {
    aggregate_id: AggregateId,
    partition_key: PartitionKey,
    commit_sequence_number: SequenceNumber,
    event_sequence_number: SequenceNumber,
    uncommitted_events: Vec<SerializedEvent>,
    memento: A,
    phase: Phase,
    snapshot_sequence_number: SequenceNumber,
    snapshot_timestamp: Option<DateTime<Utc>>,
}

impl<A: Aggregate> AggregateState<A> {
    /// A brand-new aggregate with no history.
    pub fn new(aggregate_id: AggregateId, partition_key: PartitionKey) -> Self {
        Self {
            aggregate_id,
            partition_key,
            commit_sequence_number: SequenceNumber::initial(),
            event_sequence_number: SequenceNumber::initial(),
            uncommitted_events: Vec::new(),
            memento: A::default(),
            phase: Phase::Fresh,
            snapshot_sequence_number: SequenceNumber::initial(),
            snapshot_timestamp: None,
        }
    }

    /// Seeds state from a snapshot.
    ///
    /// The empty sentinel yields a [`Phase::Fresh`] aggregate with a default
    /// memento.
    pub fn create_from(snapshot: SerializedSnapshot) -> Result<Self> {
        if snapshot.is_empty() {
            return Ok(Self::new(snapshot.aggregate_id, snapshot.partition_key));
        }

        Ok(Self {
            aggregate_id: snapshot.aggregate_id,
            partition_key: snapshot.partition_key,
            commit_sequence_number: snapshot.commit_sequence_number,
            event_sequence_number: snapshot.event_sequence_number,
            uncommitted_events: Vec::new(),
            memento: serde_json::from_value(snapshot.memento)?,
            phase: Phase::SnapshotLoaded,
            snapshot_sequence_number: snapshot.commit_sequence_number,
            snapshot_timestamp: Some(snapshot.timestamp),
        })
    }

    /// Applies a new event and buffers it for the next commit.
    ///
    /// The event must carry the next event sequence number and belong to this
    /// aggregate; its declared type must match its payload.
    pub fn apply_event(&self, event: Event<A::Event>, timestamp: DateTime<Utc>) -> Result<Self> {
        validate_events(
            std::slice::from_ref(&event),
            self.aggregate_id,
            self.event_sequence_number,
        )?;

        let actual = event.payload.event_type();
        if event.event_type != actual {
            return Err(AggregateError::EventTypeMismatch {
                declared: event.event_type,
                actual,
            });
        }

        let serialized = SerializedEvent::new(
            actual,
            event.sequence_number,
            timestamp,
            event.payload.encode()?,
        );

        let mut next = self.clone();
        next.memento.apply(&event.payload);
        next.uncommitted_events.push(serialized);
        next.event_sequence_number = event.sequence_number;
        next.phase = Phase::Dirty;
        Ok(next)
    }

    /// Applies `payload` as the next event, stamped with the current time.
    pub fn apply(&self, payload: A::Event) -> Result<Self> {
        let event = Event::new(
            self.aggregate_id,
            self.partition_key.clone(),
            payload.event_type(),
            self.event_sequence_number.next(),
            payload,
        );
        self.apply_event(event, Utc::now())
    }

    /// Folds historical commits into the state.
    ///
    /// Fails before touching anything if events are buffered, if the commits
    /// do not continue the current position, or if any payload cannot be
    /// decoded.
    pub fn apply_commits(&self, commits: &[Commit]) -> Result<Self> {
        if !self.uncommitted_events.is_empty() {
            return Err(AggregateError::DirtyBuffer {
                aggregate_id: self.aggregate_id,
                pending: self.uncommitted_events.len(),
            });
        }

        validate_commits(
            commits,
            self.aggregate_id,
            self.commit_sequence_number,
            self.event_sequence_number,
        )?;

        let mut next = self.clone();
        for commit in commits {
            for event in &commit.events {
                let payload = A::Event::decode(&event.event_type, &event.payload)?;
                next.memento.apply(&payload);
                next.event_sequence_number = event.sequence_number;
            }
            next.commit_sequence_number = commit.sequence_number;
        }
        if !commits.is_empty() {
            next.phase = Phase::Replaying;
        }
        Ok(next)
    }

    /// Captures the committed state as a snapshot.
    ///
    /// Buffered events are never part of a snapshot: it is only meaningful
    /// right after a commit or a replay.
    pub fn to_snapshot(&self, timestamp: DateTime<Utc>) -> Result<SerializedSnapshot> {
        if !self.uncommitted_events.is_empty() {
            return Err(AggregateError::DirtyBuffer {
                aggregate_id: self.aggregate_id,
                pending: self.uncommitted_events.len(),
            });
        }

        Ok(SerializedSnapshot::from_state(
            self.aggregate_id,
            self.partition_key.clone(),
            self.commit_sequence_number,
            self.event_sequence_number,
            timestamp,
            &self.memento,
        )?)
    }

    /// Builds the commit that would make the buffered events durable.
    pub(crate) fn pending_commit(&self, timestamp: DateTime<Utc>) -> Result<Commit> {
        Ok(Commit::new(
            self.aggregate_id,
            self.partition_key.clone(),
            self.commit_sequence_number.next(),
            timestamp,
            self.uncommitted_events.clone(),
        )?)
    }

    /// The state after `commit` landed.
    pub(crate) fn committed(&self, commit: &Commit) -> Self {
        Self {
            commit_sequence_number: commit.sequence_number,
            uncommitted_events: Vec::new(),
            phase: Phase::Current,
            ..self.clone()
        }
    }

    /// The state after a snapshot of it was stored.
    pub(crate) fn snapshotted(self, timestamp: DateTime<Utc>) -> Self {
        Self {
            snapshot_sequence_number: self.commit_sequence_number,
            snapshot_timestamp: Some(timestamp),
            ..self
        }
    }

    /// Marks a clean state as caught up with the store.
    pub(crate) fn into_current(self) -> Self {
        let phase = match self.phase {
            Phase::Dirty => Phase::Dirty,
            Phase::Fresh if self.commit_sequence_number == SequenceNumber::initial() => {
                Phase::Fresh
            }
            _ => Phase::Current,
        };
        Self { phase, ..self }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    /// Last durably committed commit; 0 if none.
    pub fn commit_sequence_number(&self) -> SequenceNumber {
        self.commit_sequence_number
    }

    /// Last applied event, including uncommitted ones; 0 if none.
    pub fn event_sequence_number(&self) -> SequenceNumber {
        self.event_sequence_number
    }

    pub fn uncommitted_events(&self) -> &[SerializedEvent] {
        &self.uncommitted_events
    }

    pub fn is_dirty(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    pub fn memento(&self) -> &A {
        &self.memento
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Commit sequence number of the latest snapshot this state knows of.
    pub fn snapshot_sequence_number(&self) -> SequenceNumber {
        self.snapshot_sequence_number
    }

    /// When the latest known snapshot was taken.
    pub fn snapshot_timestamp(&self) -> Option<DateTime<Utc>> {
        self.snapshot_timestamp
    }
}
