//! Contiguity checks for commits and events.
//!
//! These run over a candidate batch before anything is applied or written and
//! never mutate their input.

use crate::{AggregateId, Commit, Event, SequenceError, SequenceNumber};

/// Checks a single commit in isolation: non-empty, events contiguous.
pub fn validate_commit(commit: &Commit) -> Result<(), SequenceError> {
    let Some(first) = commit.events.first() else {
        return Err(SequenceError::EmptyCommit {
            aggregate_id: commit.aggregate_id,
            sequence_number: commit.sequence_number,
        });
    };

    let mut expected = first.sequence_number;
    for event in &commit.events {
        if event.sequence_number != expected {
            return Err(SequenceError::CommitEventOutOfSequence {
                aggregate_id: commit.aggregate_id,
                commit: commit.sequence_number,
                expected,
                actual: event.sequence_number,
            });
        }
        expected = expected.next();
    }

    Ok(())
}

/// Checks that `commits` continue an aggregate currently at
/// (`current_commit`, `current_event`).
///
/// Every commit must belong to `expected_aggregate_id`, carry the next commit
/// sequence number, and hold events that continue the running event counter,
/// which carries across commits in the batch.
pub fn validate_commits(
    commits: &[Commit],
    expected_aggregate_id: AggregateId,
    current_commit: SequenceNumber,
    current_event: SequenceNumber,
) -> Result<(), SequenceError> {
    let mut last_commit = current_commit;
    let mut last_event = current_event;

    for commit in commits {
        if commit.aggregate_id != expected_aggregate_id {
            return Err(SequenceError::ForeignAggregate {
                expected: expected_aggregate_id,
                actual: commit.aggregate_id,
                sequence_number: commit.sequence_number,
            });
        }

        let expected_commit = last_commit.next();
        if commit.sequence_number != expected_commit {
            return Err(SequenceError::CommitOutOfSequence {
                aggregate_id: expected_aggregate_id,
                expected: expected_commit,
                actual: commit.sequence_number,
            });
        }

        if commit.events.is_empty() {
            return Err(SequenceError::EmptyCommit {
                aggregate_id: expected_aggregate_id,
                sequence_number: commit.sequence_number,
            });
        }

        for event in &commit.events {
            let expected_event = last_event.next();
            if event.sequence_number != expected_event {
                return Err(SequenceError::CommitEventOutOfSequence {
                    aggregate_id: expected_aggregate_id,
                    commit: commit.sequence_number,
                    expected: expected_event,
                    actual: event.sequence_number,
                });
            }
            last_event = expected_event;
        }

        last_commit = expected_commit;
    }

    Ok(())
}

/// Checks that a flat list of events continues an aggregate at `current_event`.
pub fn validate_events<P>(
    events: &[Event<P>],
    expected_aggregate_id: AggregateId,
    current_event: SequenceNumber,
) -> Result<(), SequenceError> {
    let mut last_event = current_event;

    for event in events {
        if event.aggregate_id != expected_aggregate_id {
            return Err(SequenceError::ForeignAggregate {
                expected: expected_aggregate_id,
                actual: event.aggregate_id,
                sequence_number: event.sequence_number,
            });
        }

        let expected = last_event.next();
        if event.sequence_number != expected {
            return Err(SequenceError::EventOutOfSequence {
                aggregate_id: expected_aggregate_id,
                expected,
                actual: event.sequence_number,
            });
        }
        last_event = expected;
    }

    Ok(())
}
