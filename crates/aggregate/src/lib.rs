//! Aggregate layer for the event-sourcing storage engine.
//!
//! This crate provides:
//! - [`Aggregate`] and [`DomainEvent`] traits for event-sourced state
//! - [`AggregateState`], the copy-on-apply replay accumulator
//! - [`AggregateReader`] (snapshot plus paged commit replay) and
//!   [`AggregateWriter`] (optimistic commit, best-effort snapshot)
//! - snapshot policies and a [`Repository`] command executor

pub mod aggregate;
pub mod error;
pub mod policy;
pub mod reader;
pub mod repository;
pub mod state;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::{AggregateError, Result};
pub use policy::{
    AlwaysSnapshotPolicy, CommitCountSnapshotPolicy, IntervalSnapshotPolicy, NeverSnapshotPolicy,
    SnapshotPolicy,
};
pub use reader::{AggregateReader, ReadOptions};
pub use repository::{CommandResult, Repository};
pub use state::{AggregateState, Phase};
pub use writer::AggregateWriter;
