use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, Checkpoint, Commit, CommitId, EventStoreError, PartitionKey, Result,
    SequenceNumber, SerializedEvent, SerializedSnapshot, StoreConfig,
    sequence::{validate_commit, validate_commits},
    store::{
        CheckpointStore, CommitPage, CommitRange, ContinuationToken, EventReader, EventWriter,
        FeedPage, FeedSource, SnapshotReader, SnapshotWriter,
    },
};

// Appends hold this advisory lock so positions become visible in order.
const APPEND_LOCK_KEY: i64 = 0x636f_6d6d_6974;

const COMMIT_COLUMNS: &str =
    "position, id, aggregate_id, partition_key, sequence_number, timestamp, events";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    feed_page_size: i64,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store with default paging.
    pub fn new(pool: PgPool) -> Self {
        Self::from_config(pool, &StoreConfig::default())
    }

    /// Creates a store over `pool` using the paging settings of `config`.
    pub fn from_config(pool: PgPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            feed_page_size: config.feed_page_size.max(1) as i64,
        }
    }

    /// Connects to `config.database_url` and creates a store over the new pool.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let Some(url) = config.database_url.as_deref() else {
            return Err(EventStoreError::Store(
                "DATABASE_URL is not configured".to_string(),
            ));
        };
        let pool = PgPool::connect(url).await?;
        tracing::info!("connected to PostgreSQL event store");
        Ok(Self::from_config(pool, config))
    }

    /// Returns the number of commits per backend feed page.
    pub fn feed_page_size(&self) -> usize {
        self.feed_page_size as usize
    }

    /// Sets the number of commits per backend feed page.
    pub fn with_feed_page_size(mut self, page_size: usize) -> Self {
        self.feed_page_size = page_size.max(1) as i64;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_commit(row: PgRow) -> Result<Commit> {
        let events: serde_json::Value = row.try_get("events")?;
        let events: Vec<SerializedEvent> = serde_json::from_value(events)?;

        Ok(Commit {
            id: CommitId::from_uuid(row.try_get::<Uuid, _>("id")?),
            partition_key: PartitionKey::new(row.try_get::<String, _>("partition_key")?),
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            sequence_number: SequenceNumber::new(row.try_get("sequence_number")?),
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            events,
        })
    }

    fn row_to_snapshot(row: PgRow) -> Result<SerializedSnapshot> {
        Ok(SerializedSnapshot {
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            partition_key: PartitionKey::new(row.try_get::<String, _>("partition_key")?),
            commit_sequence_number: SequenceNumber::new(row.try_get("commit_sequence_number")?),
            event_sequence_number: SequenceNumber::new(row.try_get("event_sequence_number")?),
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            memento: row.try_get("memento")?,
            store_metadata: row.try_get("store_metadata")?,
        })
    }

    fn is_unique_violation(error: &sqlx::Error, constraint: &str) -> bool {
        matches!(error, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
    }
}

#[async_trait]
impl EventWriter for PostgresEventStore {
    async fn write_commit(&self, commit: Commit) -> Result<()> {
        validate_commit(&commit)?;

        let aggregate_id = commit.aggregate_id;
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let head: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT sequence_number, last_event_sequence
            FROM commits
            WHERE aggregate_id = $1
            ORDER BY sequence_number DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let (last_commit, last_event) = head
            .map(|(c, e)| (SequenceNumber::new(c), SequenceNumber::new(e)))
            .unwrap_or_default();

        if commit.sequence_number <= last_commit {
            metrics::counter!("event_store_concurrency_conflicts").increment(1);
            return Err(EventStoreError::Concurrency {
                aggregate_id,
                sequence_number: commit.sequence_number,
            });
        }
        validate_commits(
            std::slice::from_ref(&commit),
            aggregate_id,
            last_commit,
            last_event,
        )?;

        let events = serde_json::to_value(&commit.events)?;
        sqlx::query(
            r#"
            INSERT INTO commits (id, aggregate_id, partition_key, sequence_number, last_event_sequence, timestamp, events)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(commit.id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .bind(commit.partition_key.as_str())
        .bind(commit.sequence_number.as_i64())
        .bind(commit.last_event_sequence().as_i64())
        .bind(commit.timestamp)
        .bind(events)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e, "unique_aggregate_commit") {
                return EventStoreError::Concurrency {
                    aggregate_id,
                    sequence_number: commit.sequence_number,
                };
            }
            EventStoreError::Database(e)
        })?;

        tx.commit().await?;
        metrics::counter!("event_store_commits_written").increment(1);
        Ok(())
    }
}

#[async_trait]
impl EventReader for PostgresEventStore {
    async fn read_commits(&self, range: CommitRange) -> Result<CommitPage> {
        let limit = range.max_items.max(1);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMMIT_COLUMNS}
            FROM commits
            WHERE aggregate_id = $1 AND partition_key = $2
              AND sequence_number >= $3 AND sequence_number <= $4
            ORDER BY sequence_number ASC
            LIMIT $5
            "#
        ))
        .bind(range.aggregate_id.as_uuid())
        .bind(range.partition_key.as_str())
        .bind(range.from.as_i64())
        .bind(range.to.as_i64())
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > limit;
        let commits = rows
            .into_iter()
            .take(limit)
            .map(Self::row_to_commit)
            .collect::<Result<Vec<_>>>()?;

        let continuation = match commits.last() {
            Some(last) if has_more => Some(ContinuationToken::for_range(
                &range.resume_after(last.sequence_number),
            )?),
            _ => None,
        };

        Ok(CommitPage {
            commits,
            continuation,
        })
    }
}

#[async_trait]
impl SnapshotReader for PostgresEventStore {
    async fn read_snapshot(
        &self,
        aggregate_id: AggregateId,
        partition_key: &PartitionKey,
        at_or_below: SequenceNumber,
    ) -> Result<SerializedSnapshot> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_id, partition_key, commit_sequence_number, event_sequence_number,
                   timestamp, memento, store_metadata
            FROM snapshots
            WHERE aggregate_id = $1 AND partition_key = $2 AND commit_sequence_number <= $3
            ORDER BY commit_sequence_number DESC
            LIMIT 1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(partition_key.as_str())
        .bind(at_or_below.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_snapshot(row),
            None => Ok(SerializedSnapshot::empty(aggregate_id, partition_key.clone())),
        }
    }
}

#[async_trait]
impl SnapshotWriter for PostgresEventStore {
    async fn write_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        if snapshot.is_empty() {
            return Err(EventStoreError::Store(
                "refusing to persist the empty snapshot sentinel".to_string(),
            ));
        }

        let aggregate_id = snapshot.aggregate_id;
        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, partition_key, commit_sequence_number,
                                   event_sequence_number, timestamp, memento, store_metadata)
            SELECT $1, $2, $3, $4, $5, $6, jsonb_build_object('position', c.position)
            FROM commits c
            WHERE c.aggregate_id = $1 AND c.sequence_number = $3
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(snapshot.partition_key.as_str())
        .bind(snapshot.commit_sequence_number.as_i64())
        .bind(snapshot.event_sequence_number.as_i64())
        .bind(snapshot.timestamp)
        .bind(&snapshot.memento)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e, "unique_aggregate_snapshot") {
                return EventStoreError::Concurrency {
                    aggregate_id,
                    sequence_number: snapshot.commit_sequence_number,
                };
            }
            EventStoreError::Database(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(EventStoreError::Store(format!(
                "snapshot of aggregate {aggregate_id} references unknown commit {}",
                snapshot.commit_sequence_number
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedSource for PostgresEventStore {
    fn source_id(&self) -> &'static str {
        "postgres"
    }

    async fn fetch_page(&self, partition: u64, continuation: Option<&str>) -> Result<FeedPage> {
        if partition != 0 {
            return Err(EventStoreError::InvalidCheckpoint(format!(
                "partition {partition} does not exist; the commit log is a single partition"
            )));
        }
        let after: i64 = match continuation {
            Some(token) => token.parse().map_err(|_| {
                EventStoreError::InvalidCheckpoint(format!("bad page continuation '{token}'"))
            })?,
            None => 0,
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {COMMIT_COLUMNS}
            FROM commits
            WHERE position > $1
            ORDER BY position ASC
            LIMIT $2
            "#
        ))
        .bind(after)
        .bind(self.feed_page_size)
        .fetch_all(&self.pool)
        .await?;

        let last_position = rows
            .last()
            .map(|row| row.try_get::<i64, _>("position"))
            .transpose()?;
        let full = rows.len() as i64 == self.feed_page_size;

        let commits = rows
            .into_iter()
            .map(Self::row_to_commit)
            .collect::<Result<Vec<_>>>()?;

        Ok(FeedPage {
            commits,
            next: last_position.filter(|_| full).map(|p| p.to_string()),
        })
    }

    async fn next_partition(&self, _partition: u64) -> Result<Option<u64>> {
        Ok(None)
    }
}

#[async_trait]
impl CheckpointStore for PostgresEventStore {
    async fn save_checkpoint(&self, identity: &str, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_checkpoints (identity, payload, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (identity) DO UPDATE SET
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(identity)
        .bind(checkpoint.as_bytes())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_checkpoint(&self, identity: &str) -> Result<Option<Checkpoint>> {
        let payload: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT payload FROM feed_checkpoints WHERE identity = $1")
                .bind(identity)
                .fetch_optional(&self.pool)
                .await?;

        Ok(payload.map(Checkpoint::from_bytes))
    }

    async fn reset_checkpoint(&self, identity: &str) -> Result<()> {
        sqlx::query("DELETE FROM feed_checkpoints WHERE identity = $1")
            .bind(identity)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
