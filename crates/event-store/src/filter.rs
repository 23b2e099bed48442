use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{AggregateId, Commit, PartitionKey};

/// Narrows the cross-aggregate feed.
///
/// Each dimension is an allow-list; an empty list places no restriction on
/// that dimension. A commit passes when it matches any entry of every
/// non-empty dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    /// Allowed aggregate IDs (any of these).
    #[serde(default)]
    pub aggregate_ids: BTreeSet<AggregateId>,

    /// Allowed partition keys (any of these).
    #[serde(default)]
    pub partition_keys: BTreeSet<PartitionKey>,
}

impl FeedFilter {
    /// Creates a filter that passes every commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for a set of aggregates.
    pub fn for_aggregates(ids: impl IntoIterator<Item = AggregateId>) -> Self {
        Self {
            aggregate_ids: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Creates a filter for a set of partition keys.
    pub fn for_partitions(keys: impl IntoIterator<Item = PartitionKey>) -> Self {
        Self {
            partition_keys: keys.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Adds an allowed aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_ids.insert(id);
        self
    }

    /// Adds an allowed partition key.
    pub fn partition_key(mut self, key: impl Into<PartitionKey>) -> Self {
        self.partition_keys.insert(key.into());
        self
    }

    /// True when neither dimension restricts anything.
    pub fn is_unrestricted(&self) -> bool {
        self.aggregate_ids.is_empty() && self.partition_keys.is_empty()
    }

    /// Returns whether `commit` passes the filter.
    pub fn matches(&self, commit: &Commit) -> bool {
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&commit.aggregate_id) {
            return false;
        }
        if !self.partition_keys.is_empty() && !self.partition_keys.contains(&commit.partition_key)
        {
            return false;
        }
        true
    }
}
