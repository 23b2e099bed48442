//! Minimal aggregate used by the unit tests.

use chrono::{DateTime, TimeZone, Utc};
use common::{AggregateId, PartitionKey};
use event_store::{Commit, SequenceNumber, SerializedEvent};
use serde::{Deserialize, Serialize};

use crate::{Aggregate, DomainEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CounterEvent {
    #[serde(rename = "counter.incremented")]
    Incremented { by: i64 },

    #[serde(rename = "counter.reset")]
    Reset,
}

impl DomainEvent for CounterEvent {
    const EVENT_TYPES: &'static [&'static str] = &["counter.incremented", "counter.reset"];

    fn event_type(&self) -> &'static str {
        match self {
            CounterEvent::Incremented { .. } => "counter.incremented",
            CounterEvent::Reset => "counter.reset",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
    pub applied: u64,
}

impl Aggregate for Counter {
    type Event = CounterEvent;

    fn aggregate_type() -> &'static str {
        "Counter"
    }

    fn apply(&mut self, event: &CounterEvent) {
        match event {
            CounterEvent::Incremented { by } => self.value += by,
            CounterEvent::Reset => self.value = 0,
        }
        self.applied += 1;
    }
}

pub fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).single().unwrap_or_default()
}

/// A commit of `Incremented { by: 1 }` events numbered from `first_event`.
pub fn increment_commit(
    aggregate_id: AggregateId,
    partition_key: &PartitionKey,
    sequence: i64,
    first_event: i64,
    count: i64,
) -> Commit {
    let events = (first_event..first_event + count)
        .map(|seq| {
            SerializedEvent::new(
                "counter.incremented",
                SequenceNumber::new(seq),
                at(0),
                CounterEvent::Incremented { by: 1 }.encode().unwrap(),
            )
        })
        .collect();

    Commit::new(
        aggregate_id,
        partition_key.clone(),
        SequenceNumber::new(sequence),
        at(0),
        events,
    )
    .unwrap()
}
