use thiserror::Error;

use crate::{AggregateId, SequenceNumber};

/// A commit or event that does not continue the aggregate's history.
///
/// This is a data-integrity defect: it is never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// A commit's sequence number is not exactly one past the previous commit.
    #[error(
        "Commit out of sequence for aggregate {aggregate_id}: expected commit {expected}, found {actual}"
    )]
    CommitOutOfSequence {
        aggregate_id: AggregateId,
        expected: SequenceNumber,
        actual: SequenceNumber,
    },

    /// An event inside a commit does not continue the running event sequence.
    #[error(
        "Event out of sequence in commit {commit} of aggregate {aggregate_id}: expected event {expected}, found {actual}"
    )]
    CommitEventOutOfSequence {
        aggregate_id: AggregateId,
        commit: SequenceNumber,
        expected: SequenceNumber,
        actual: SequenceNumber,
    },

    /// A standalone event does not continue the running event sequence.
    #[error(
        "Event out of sequence for aggregate {aggregate_id}: expected event {expected}, found {actual}"
    )]
    EventOutOfSequence {
        aggregate_id: AggregateId,
        expected: SequenceNumber,
        actual: SequenceNumber,
    },

    /// A record belongs to a different aggregate than the one being built.
    #[error("Record {sequence_number} belongs to aggregate {actual}, expected {expected}")]
    ForeignAggregate {
        expected: AggregateId,
        actual: AggregateId,
        sequence_number: SequenceNumber,
    },

    /// A commit carries no events.
    #[error("Commit {sequence_number} of aggregate {aggregate_id} contains no events")]
    EmptyCommit {
        aggregate_id: AggregateId,
        sequence_number: SequenceNumber,
    },
}

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer already holds this commit (or snapshot) slot.
    ///
    /// Recoverable: re-read the aggregate, re-run the domain logic, retry.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: sequence number {sequence_number} is already taken"
    )]
    Concurrency {
        aggregate_id: AggregateId,
        sequence_number: SequenceNumber,
    },

    /// The records handed to the store are out of order or belong elsewhere.
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// A feed checkpoint could not be decoded or belongs to another source.
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// A commit-read continuation token could not be decoded.
    #[error("Invalid continuation token: {0}")]
    InvalidContinuation(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic backend failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The operation observed its cancellation token between round-trips.
    #[error("Operation cancelled")]
    Cancelled,
}

impl EventStoreError {
    /// True when the caller lost an optimistic-concurrency race.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, EventStoreError::Concurrency { .. })
    }

    /// True when the error is a sequencing/data-integrity defect.
    pub fn is_sequence(&self) -> bool {
        matches!(self, EventStoreError::Sequence(_))
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_message_names_the_slot() {
        let id = AggregateId::new();
        let err = EventStoreError::Concurrency {
            aggregate_id: id,
            sequence_number: SequenceNumber::new(4),
        };
        assert!(err.is_concurrency());
        assert!(!err.is_sequence());
        assert!(err.to_string().contains("sequence number 4"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn sequence_error_converts_into_store_error() {
        let err: EventStoreError = SequenceError::EventOutOfSequence {
            aggregate_id: AggregateId::new(),
            expected: SequenceNumber::new(3),
            actual: SequenceNumber::new(5),
        }
        .into();
        assert!(err.is_sequence());
        assert!(err.to_string().contains("expected event 3, found 5"));
    }
}
