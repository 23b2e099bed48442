//! The cross-aggregate feed over any paged backend.
//!
//! A backend exposes its global commit log as pages ([`FeedSource`]); the
//! caller asks for at most `max_items` matching commits at a time. The two
//! sizes are independent, so the position kept in the checkpoint is the
//! backend page (partition + continuation) plus how many records of that
//! page have already been looked at.

use async_trait::async_trait;
use event_store::{
    CancellationToken, Checkpoint, EventFeed, EventStoreError, FeedBatch, FeedFilter,
    FeedPosition, FeedSource, Result,
};
use futures_core::Stream;

/// [`EventFeed`] implementation driving a [`FeedSource`].
///
/// Commits come out in the backend's append order. Resuming from a returned
/// checkpoint continues exactly where the previous call stopped, even in the
/// middle of a backend page. Commits appended since are picked up by later
/// calls. On error no checkpoint is produced; retry from the last one.
#[derive(Clone)]
pub struct PagedFeed<S> {
    source: S,
}

enum Cursor {
    Start(FeedFilter, usize),
    Resume(Checkpoint),
}

impl<S: FeedSource> PagedFeed<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Streams successive batches until a call returns no commits.
    ///
    /// Each item carries the checkpoint to persist once its commits are
    /// handled.
    pub fn stream(
        &self,
        filter: FeedFilter,
        max_items: usize,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<FeedBatch>> + '_ {
        futures_util::stream::try_unfold(Cursor::Start(filter, max_items), move |cursor| {
            self.next_batch(cursor, cancel.clone())
        })
    }

    async fn next_batch(
        &self,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> Result<Option<(FeedBatch, Cursor)>> {
        let batch = match cursor {
            Cursor::Start(filter, max_items) => self.get(filter, max_items, &cancel).await?,
            Cursor::Resume(checkpoint) => self.get_from(&checkpoint, &cancel).await?,
        };

        if batch.commits.is_empty() {
            return Ok(None);
        }
        let next = Cursor::Resume(batch.checkpoint.clone());
        Ok(Some((batch, next)))
    }

    async fn collect(
        &self,
        mut position: FeedPosition,
        cancel: &CancellationToken,
    ) -> Result<FeedBatch> {
        let mut commits = Vec::new();
        // Set once the current partition is known to be closed; its tail page
        // is then read one last time before moving on.
        let mut sealed_next: Option<u64> = None;

        loop {
            if cancel.is_cancelled() {
                return Err(EventStoreError::Cancelled);
            }

            let page = self
                .source
                .fetch_page(position.partition, position.continuation.as_deref())
                .await?;
            metrics::counter!("feed_pages_fetched").increment(1);
            tracing::debug!(
                partition = position.partition,
                records = page.commits.len(),
                skip = position.skip,
                "fetched feed page"
            );

            for (index, commit) in page.commits.iter().enumerate().skip(position.skip) {
                if !position.filter.matches(commit) {
                    continue;
                }
                commits.push(commit.clone());
                if commits.len() >= position.max_items {
                    position.skip = index + 1;
                    return self.finish(commits, &position);
                }
            }

            if let Some(next) = page.next {
                position.continuation = Some(next);
                position.skip = 0;
                sealed_next = None;
                continue;
            }

            position.skip = position.skip.max(page.commits.len());

            if let Some(partition) = sealed_next.take() {
                position.partition = partition;
                position.continuation = None;
                position.skip = 0;
                continue;
            }

            match self.source.next_partition(position.partition).await? {
                Some(partition) => sealed_next = Some(partition),
                None => return self.finish(commits, &position),
            }
        }
    }

    fn finish(
        &self,
        commits: Vec<event_store::Commit>,
        position: &FeedPosition,
    ) -> Result<FeedBatch> {
        metrics::counter!("feed_commits_delivered").increment(commits.len() as u64);
        Ok(FeedBatch {
            commits,
            checkpoint: position.encode(self.source.source_id())?,
        })
    }
}

#[async_trait]
impl<S: FeedSource> EventFeed for PagedFeed<S> {
    #[tracing::instrument(
        skip(self, filter, cancel),
        fields(source = self.source.source_id(), unrestricted = filter.is_unrestricted())
    )]
    async fn get(
        &self,
        filter: FeedFilter,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<FeedBatch> {
        let partition = self.source.first_partition().await?;
        let position = FeedPosition::start(filter, max_items.max(1), partition);
        self.collect(position, cancel).await
    }

    #[tracing::instrument(skip(self, checkpoint, cancel), fields(source = self.source.source_id()))]
    async fn get_from(
        &self,
        checkpoint: &Checkpoint,
        cancel: &CancellationToken,
    ) -> Result<FeedBatch> {
        let position = FeedPosition::decode(checkpoint, self.source.source_id())?;
        self.collect(position, cancel).await
    }
}
