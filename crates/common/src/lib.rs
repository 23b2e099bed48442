//! Shared identifier types for the event-sourcing storage engine.

mod types;

pub use types::{AggregateId, PartitionKey};
