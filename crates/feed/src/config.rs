//! Indexer configuration loaded from environment variables.

use std::time::Duration;

/// All-stream indexer settings with sensible defaults.
///
/// Reads from environment variables:
/// - `INDEXER_BATCH_SIZE`: commits read per input per round (default: `100`)
/// - `INDEXER_POLL_INTERVAL_MS`: sleep between empty rounds (default: `1000`)
/// - `INDEXER_DEDUP_WINDOW_SECS`: how long merged commits are remembered (default: `300`)
/// - `INDEXER_DEDUP_CAPACITY`: most commits remembered at once (default: `10000`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub dedup_window: Duration,
    pub dedup_capacity: usize,
}

impl IndexerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_u64("INDEXER_BATCH_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.batch_size),
            poll_interval: env_u64("INDEXER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            dedup_window: env_u64("INDEXER_DEDUP_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_window),
            dedup_capacity: env_u64("INDEXER_DEDUP_CAPACITY")
                .map(|v| v as usize)
                .unwrap_or(defaults.dedup_capacity),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(1000),
            dedup_window: Duration::from_secs(300),
            dedup_capacity: 10_000,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
}
