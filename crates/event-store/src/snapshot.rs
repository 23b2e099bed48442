use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AggregateId, PartitionKey, SequenceNumber};

/// A point-in-time capture of an aggregate's folded state.
///
/// Snapshots are superseded, never updated: readers pick the latest one at or
/// below the commit they want to reach. An aggregate without a snapshot is
/// represented by the [`SerializedSnapshot::empty`] sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSnapshot {
    pub aggregate_id: AggregateId,

    pub partition_key: PartitionKey,

    /// Last commit folded into the memento.
    pub commit_sequence_number: SequenceNumber,

    /// Last event folded into the memento.
    pub event_sequence_number: SequenceNumber,

    pub timestamp: DateTime<Utc>,

    /// The serialized aggregate state.
    pub memento: serde_json::Value,

    /// Backend-specific resume pointer. Opaque to everything but the backend.
    #[serde(default)]
    pub store_metadata: serde_json::Value,
}

impl SerializedSnapshot {
    /// The sentinel returned for an aggregate that has no snapshot yet.
    pub fn empty(aggregate_id: AggregateId, partition_key: PartitionKey) -> Self {
        Self {
            aggregate_id,
            partition_key,
            commit_sequence_number: SequenceNumber::initial(),
            event_sequence_number: SequenceNumber::initial(),
            timestamp: DateTime::<Utc>::default(),
            memento: serde_json::Value::Null,
            store_metadata: serde_json::Value::Null,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        commit_sequence_number: SequenceNumber,
        event_sequence_number: SequenceNumber,
        timestamp: DateTime<Utc>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            aggregate_id,
            partition_key,
            commit_sequence_number,
            event_sequence_number,
            timestamp,
            memento: serde_json::to_value(state)?,
            store_metadata: serde_json::Value::Null,
        })
    }

    /// True for the "no snapshot yet" sentinel.
    pub fn is_empty(&self) -> bool {
        self.commit_sequence_number == SequenceNumber::initial()
    }

    /// Deserializes the memento into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.memento)
    }

    /// Returns a copy carrying the given backend metadata.
    pub fn with_store_metadata(mut self, store_metadata: serde_json::Value) -> Self {
        self.store_metadata = store_metadata;
        self
    }
}
