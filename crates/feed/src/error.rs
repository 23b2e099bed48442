//! Feed error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while consuming or indexing the feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// A commit handler failed; the checkpoint was not advanced.
    #[error("Handler '{handler}' failed: {reason}")]
    Handler {
        handler: &'static str,
        reason: String,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl FeedError {
    /// Creates a handler failure.
    pub fn handler(handler: &'static str, reason: impl Into<String>) -> Self {
        FeedError::Handler {
            handler,
            reason: reason.into(),
        }
    }

    /// Returns true if the stored checkpoint could not be used.
    pub fn is_invalid_checkpoint(&self) -> bool {
        matches!(self, FeedError::EventStore(EventStoreError::InvalidCheckpoint(_)))
    }
}

impl From<EventStoreError> for FeedError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::Cancelled => FeedError::Cancelled,
            other => FeedError::EventStore(other),
        }
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
