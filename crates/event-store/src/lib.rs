//! Storage layer for the event-sourcing engine.
//!
//! - [`Commit`] and [`SerializedEvent`]: the immutable, ordered units written per aggregate
//! - [`sequence`]: contiguity checks run before any commit is applied or written
//! - [`store`]: the reader/writer/snapshot/checkpoint/feed ports backends implement
//! - [`InMemoryEventStore`] and [`PostgresEventStore`]: the bundled backends

pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod sequence;
pub mod snapshot;
pub mod store;

pub use checkpoint::{CHECKPOINT_FORMAT_VERSION, Checkpoint, FeedPosition};
pub use commit::Commit;
pub use common::{AggregateId, PartitionKey};
pub use config::StoreConfig;
pub use error::{EventStoreError, Result, SequenceError};
pub use event::{CommitId, Event, SequenceNumber, SerializedEvent};
pub use filter::FeedFilter;
pub use memory::{InMemoryCheckpointStore, InMemoryEventStore};
pub use postgres::PostgresEventStore;
pub use sequence::{validate_commit, validate_commits, validate_events};
pub use snapshot::SerializedSnapshot;
pub use store::{
    CheckpointStore, CommitPage, CommitRange, ContinuationToken, EventFeed, EventReader,
    EventWriter, FeedBatch, FeedPage, FeedSource, SnapshotReader, SnapshotWriter,
};
pub use tokio_util::sync::CancellationToken;
