//! Checkpointed delivery of the feed to commit handlers.

use async_trait::async_trait;
use event_store::{CancellationToken, CheckpointStore, Commit, EventFeed, FeedBatch, FeedFilter};

use crate::{FeedError, Result};

/// A consumer of feed commits, such as a read model or an outbox.
///
/// Delivery is at-least-once: after a crash between handling and saving the
/// checkpoint, the same commits are delivered again.
#[async_trait]
pub trait CommitHandler: Send + Sync {
    /// Returns the handler name, used in errors and logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, commit: &Commit) -> Result<()>;

    /// Drops everything derived so far, before a rebuild.
    async fn reset(&self) -> Result<()>;
}

/// What to do when the stored checkpoint cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidCheckpointPolicy {
    /// Start the feed over from the beginning.
    Restart,

    /// Surface the error and leave the stored checkpoint alone.
    #[default]
    Fail,
}

/// Feeds commits to registered handlers, persisting progress under `identity`.
///
/// The subscription supports:
/// - Polling: one feed call, delivered to every handler, then checkpointed
/// - Catch-up: polling until the feed has nothing new
/// - Rebuild: resetting the checkpoint and the handlers, then catching up
pub struct FeedSubscription<F, C> {
    identity: String,
    feed: F,
    checkpoints: C,
    filter: FeedFilter,
    max_items: usize,
    handlers: Vec<Box<dyn CommitHandler>>,
    on_invalid_checkpoint: InvalidCheckpointPolicy,
}

impl<F: EventFeed, C: CheckpointStore> FeedSubscription<F, C> {
    /// Creates a subscription over the whole feed, 100 commits per poll.
    pub fn new(identity: impl Into<String>, feed: F, checkpoints: C) -> Self {
        Self {
            identity: identity.into(),
            feed,
            checkpoints,
            filter: FeedFilter::new(),
            max_items: 100,
            handlers: Vec::new(),
            on_invalid_checkpoint: InvalidCheckpointPolicy::default(),
        }
    }

    /// Restricts the subscription. Only applies when it starts from scratch.
    pub fn with_filter(mut self, filter: FeedFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    pub fn on_invalid_checkpoint(mut self, policy: InvalidCheckpointPolicy) -> Self {
        self.on_invalid_checkpoint = policy;
        self
    }

    /// Registers a handler. Handlers see each commit in registration order.
    pub fn register(&mut self, handler: Box<dyn CommitHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Fetches one batch, delivers it and saves the new checkpoint.
    ///
    /// Returns the number of commits delivered. If any handler fails the
    /// checkpoint stays where it was.
    #[tracing::instrument(skip(self, cancel), fields(identity = %self.identity))]
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let batch = self.fetch(cancel).await?;

        for commit in &batch.commits {
            for handler in &self.handlers {
                handler.handle(commit).await?;
            }
        }

        self.checkpoints
            .save_checkpoint(&self.identity, &batch.checkpoint)
            .await?;
        metrics::counter!("feed_subscription_commits_handled").increment(batch.commits.len() as u64);

        Ok(batch.commits.len())
    }

    /// Polls until a batch comes back empty, returning the total delivered.
    #[tracing::instrument(skip(self, cancel), fields(identity = %self.identity))]
    pub async fn catch_up(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut total = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FeedError::Cancelled);
            }
            let delivered = self.poll_once(cancel).await?;
            if delivered == 0 {
                break;
            }
            total += delivered;
        }

        tracing::info!(commits_handled = total, "catch-up complete");
        Ok(total)
    }

    /// Forgets the checkpoint, resets every handler and replays from scratch.
    #[tracing::instrument(skip(self, cancel), fields(identity = %self.identity))]
    pub async fn rebuild(&self, cancel: &CancellationToken) -> Result<usize> {
        self.checkpoints.reset_checkpoint(&self.identity).await?;
        for handler in &self.handlers {
            handler.reset().await?;
        }
        self.catch_up(cancel).await
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<FeedBatch> {
        let Some(checkpoint) = self.checkpoints.read_checkpoint(&self.identity).await? else {
            return Ok(self.feed.get(self.filter.clone(), self.max_items, cancel).await?);
        };

        match self.feed.get_from(&checkpoint, cancel).await {
            Ok(batch) => Ok(batch),
            Err(e) => {
                let err = FeedError::from(e);
                if err.is_invalid_checkpoint()
                    && self.on_invalid_checkpoint == InvalidCheckpointPolicy::Restart
                {
                    tracing::warn!(error = %err, "stored checkpoint unusable, restarting feed");
                    Ok(self.feed.get(self.filter.clone(), self.max_items, cancel).await?)
                } else {
                    Err(err)
                }
            }
        }
    }
}
