use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, PartitionKey};

/// Unique identifier for a commit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(Uuid);

impl CommitId {
    /// Creates a new random commit ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a commit ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a commit or an event within one aggregate's history.
///
/// Commits and events are numbered independently. Both start at 1; 0 means
/// "nothing yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Upper bound used when a read should run to the most recent commit.
    pub const MAX: SequenceNumber = SequenceNumber(i64::MAX);

    /// Creates a sequence number from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The value before anything has been written (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// The first assigned value (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<SequenceNumber> for i64 {
    fn from(sequence: SequenceNumber) -> Self {
        sequence.0
    }
}

/// One domain fact with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<P> {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// Routing key of the aggregate's stream.
    pub partition_key: PartitionKey,

    /// Namespaced event type, e.g. `"ledger.deposited"`.
    pub event_type: String,

    /// Position of this event in the aggregate's full event history.
    pub sequence_number: SequenceNumber,

    /// The domain payload.
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        event_type: impl Into<String>,
        sequence_number: SequenceNumber,
        payload: P,
    ) -> Self {
        Self {
            aggregate_id,
            partition_key,
            event_type: event_type.into(),
            sequence_number,
            payload,
        }
    }
}

/// Wire form of an [`Event`]: the payload is opaque to the store.
///
/// The timestamp is assigned by the creator and is advisory only; ordering is
/// always by sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedEvent {
    pub sequence_number: SequenceNumber,

    #[serde(rename = "type")]
    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    pub payload: serde_json::Value,
}

impl SerializedEvent {
    pub fn new(
        event_type: impl Into<String>,
        sequence_number: SequenceNumber,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            sequence_number,
            event_type: event_type.into(),
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_id_new_creates_unique_ids() {
        assert_ne!(CommitId::new(), CommitId::new());
    }

    #[test]
    fn sequence_number_initial_and_first() {
        assert_eq!(SequenceNumber::initial().as_i64(), 0);
        assert_eq!(SequenceNumber::first().as_i64(), 1);
        assert_eq!(SequenceNumber::initial().next(), SequenceNumber::first());
        assert!(SequenceNumber::new(7) < SequenceNumber::MAX);
    }

    #[test]
    fn serialized_event_uses_wire_field_names() {
        let event = SerializedEvent::new(
            "ledger.deposited",
            SequenceNumber::new(3),
            Utc::now(),
            serde_json::json!({"amount": 10}),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sequenceNumber"], 3);
        assert_eq!(json["type"], "ledger.deposited");
        assert_eq!(json["payload"]["amount"], 10);
    }
}
