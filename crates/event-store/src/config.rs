//! Store configuration loaded from environment variables.

/// Paging and partitioning settings with sensible defaults.
///
/// Reads from environment variables:
/// - `EVENT_STORE_READ_PAGE_SIZE`: commits per replay round-trip (default: `100`)
/// - `EVENT_STORE_FEED_PAGE_SIZE`: commits per backend feed page (default: `50`)
/// - `EVENT_STORE_SEGMENT_CAPACITY`: commits per in-memory segment (default: unbounded)
/// - `DATABASE_URL`: PostgreSQL connection string (default: none)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub read_page_size: usize,
    pub feed_page_size: usize,
    pub segment_capacity: Option<usize>,
    pub database_url: Option<String>,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            read_page_size: positive_env("EVENT_STORE_READ_PAGE_SIZE")
                .unwrap_or(defaults.read_page_size),
            feed_page_size: positive_env("EVENT_STORE_FEED_PAGE_SIZE")
                .unwrap_or(defaults.feed_page_size),
            segment_capacity: positive_env("EVENT_STORE_SEGMENT_CAPACITY"),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_page_size: 100,
            feed_page_size: 50,
            segment_capacity: None,
            database_url: None,
        }
    }
}

// Zero would stall every paging loop, so it is treated as unset.
fn positive_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &usize| *v > 0)
}
