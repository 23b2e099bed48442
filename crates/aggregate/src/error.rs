//! Aggregate error types.

use common::AggregateId;
use event_store::{EventStoreError, SequenceError};
use thiserror::Error;

/// Errors raised while replaying, mutating or committing an aggregate.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A commit or event did not continue the aggregate's history.
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// Commits cannot be replayed over buffered, uncommitted events.
    #[error("Aggregate {aggregate_id} has {pending} uncommitted events; commit or discard them before replaying")]
    DirtyBuffer {
        aggregate_id: AggregateId,
        pending: usize,
    },

    /// A serialized event carries a type this aggregate does not know.
    #[error("Unknown event type '{event_type}'")]
    UnknownEventType { event_type: String },

    /// A payload decoded to a different event type than it was stored under.
    #[error("Event stored as '{declared}' decoded as '{actual}'")]
    EventTypeMismatch {
        declared: String,
        actual: &'static str,
    },

    /// The snapshot store returned a snapshot of another aggregate.
    #[error("Snapshot mismatch: expected aggregate {expected}, got {actual}")]
    SnapshotMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The command was rejected by domain logic.
    #[error("Command rejected: {0}")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl AggregateError {
    /// Returns true if another writer committed first; re-read and retry.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, AggregateError::EventStore(e) if e.is_concurrency())
    }

    /// Returns true for out-of-order or foreign data. Never retry these blindly.
    pub fn is_sequence(&self) -> bool {
        match self {
            AggregateError::Sequence(_) => true,
            AggregateError::EventStore(e) => e.is_sequence(),
            _ => false,
        }
    }
}

/// Result type for aggregate operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
