//! Cross-aggregate feed for the event-sourcing storage engine.
//!
//! This crate provides:
//! - [`PagedFeed`], the resumable, filterable feed over any backend [`event_store::FeedSource`]
//! - [`FeedSubscription`], checkpointed delivery to [`CommitHandler`]s
//! - [`AllStreamIndexer`], which merges several commit logs into one
//!   deduplicated, globally sequenced log

pub mod config;
pub mod error;
pub mod indexer;
pub mod paged;
pub mod subscription;

pub use config::IndexerConfig;
pub use error::{FeedError, Result};
pub use indexer::{
    AllStreamIndexer, InMemoryAllStream, IndexerState, MergeInput, MergeOutput, MergeRound,
    MergedCommit, SeenWindow,
};
pub use paged::PagedFeed;
pub use subscription::{CommitHandler, FeedSubscription, InvalidCheckpointPolicy};
