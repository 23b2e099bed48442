use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AggregateId, CommitId, PartitionKey, SequenceError, SequenceNumber, SerializedEvent,
    sequence::validate_commit,
};

/// An atomically written, ordered, non-empty batch of events for one aggregate.
///
/// Commit sequence numbers start at 1 and are numbered independently from
/// event sequence numbers. Serializes to the wire envelope
/// `{id, partitionKey, aggregateId, sequenceNumber, timestamp, events}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: CommitId,
    pub partition_key: PartitionKey,
    pub aggregate_id: AggregateId,
    pub sequence_number: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<SerializedEvent>,
}

impl Commit {
    /// Creates a commit, rejecting empty or internally non-contiguous batches.
    pub fn new(
        aggregate_id: AggregateId,
        partition_key: PartitionKey,
        sequence_number: SequenceNumber,
        timestamp: DateTime<Utc>,
        events: Vec<SerializedEvent>,
    ) -> Result<Self, SequenceError> {
        let commit = Self {
            id: CommitId::new(),
            partition_key,
            aggregate_id,
            sequence_number,
            timestamp,
            events,
        };
        validate_commit(&commit)?;
        Ok(commit)
    }

    /// Sequence number of the first event in this commit.
    pub fn first_event_sequence(&self) -> SequenceNumber {
        self.events
            .first()
            .map(|e| e.sequence_number)
            .unwrap_or_default()
    }

    /// Sequence number of the last event in this commit.
    pub fn last_event_sequence(&self) -> SequenceNumber {
        self.events
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: i64) -> SerializedEvent {
        SerializedEvent::new(
            "test.happened",
            SequenceNumber::new(seq),
            Utc::now(),
            serde_json::json!({"n": seq}),
        )
    }

    #[test]
    fn new_commit_tracks_event_bounds() {
        let commit = Commit::new(
            AggregateId::new(),
            PartitionKey::from("p1"),
            SequenceNumber::first(),
            Utc::now(),
            vec![event(4), event(5), event(6)],
        )
        .unwrap();

        assert_eq!(commit.first_event_sequence(), SequenceNumber::new(4));
        assert_eq!(commit.last_event_sequence(), SequenceNumber::new(6));
        assert_eq!(commit.event_count(), 3);
    }

    #[test]
    fn new_commit_rejects_empty_batch() {
        let result = Commit::new(
            AggregateId::new(),
            PartitionKey::from("p1"),
            SequenceNumber::first(),
            Utc::now(),
            vec![],
        );
        assert!(matches!(result, Err(SequenceError::EmptyCommit { .. })));
    }

    #[test]
    fn new_commit_rejects_gap_between_events() {
        let result = Commit::new(
            AggregateId::new(),
            PartitionKey::from("p1"),
            SequenceNumber::first(),
            Utc::now(),
            vec![event(1), event(3)],
        );
        assert!(matches!(
            result,
            Err(SequenceError::CommitEventOutOfSequence { .. })
        ));
    }

    #[test]
    fn commit_serializes_to_wire_envelope() {
        let id = AggregateId::new();
        let commit = Commit::new(
            id,
            PartitionKey::from("p1"),
            SequenceNumber::new(2),
            Utc::now(),
            vec![event(3)],
        )
        .unwrap();

        let json = serde_json::to_value(&commit).unwrap();
        assert_eq!(json["aggregateId"], id.to_string());
        assert_eq!(json["partitionKey"], "p1");
        assert_eq!(json["sequenceNumber"], 2);
        assert_eq!(json["events"][0]["sequenceNumber"], 3);
        assert_eq!(json["events"][0]["type"], "test.happened");
        assert!(json["id"].is_string());

        let back: Commit = serde_json::from_value(json).unwrap();
        assert_eq!(back, commit);
    }
}
