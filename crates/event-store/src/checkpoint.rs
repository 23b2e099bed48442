//! Opaque, versioned feed checkpoints.
//!
//! Callers persist a [`Checkpoint`] verbatim. Internally it is a JSON envelope
//! tagged with a format version and the id of the feed source that produced
//! it, wrapping a [`FeedPosition`].

use serde::{Deserialize, Serialize};

use crate::{EventStoreError, FeedFilter, Result};

/// Current checkpoint envelope version.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Opaque resumption token for the cross-aggregate feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checkpoint(Vec<u8>);

impl Checkpoint {
    /// Wraps bytes previously obtained from [`Checkpoint::as_bytes`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Where a feed session stands, including the filter it was started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPosition {
    pub filter: FeedFilter,

    /// Maximum commits returned per `get`.
    pub max_items: usize,

    /// Backend partition (time bucket, segment) currently being read.
    pub partition: u64,

    /// Backend continuation token of the page being read; `None` is the
    /// partition's first page.
    pub continuation: Option<String>,

    /// Records of that page already consumed.
    pub skip: usize,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    source: String,
    body: serde_json::Value,
}

impl FeedPosition {
    /// Position at the very start of `partition`.
    pub fn start(filter: FeedFilter, max_items: usize, partition: u64) -> Self {
        Self {
            filter,
            max_items,
            partition,
            continuation: None,
            skip: 0,
        }
    }

    /// Encodes the position as an opaque checkpoint for `source_id`.
    pub fn encode(&self, source_id: &str) -> Result<Checkpoint> {
        let envelope = Envelope {
            v: CHECKPOINT_FORMAT_VERSION,
            source: source_id.to_string(),
            body: serde_json::to_value(self)?,
        };
        Ok(Checkpoint(serde_json::to_vec(&envelope)?))
    }

    /// Decodes a checkpoint produced by `source_id`.
    ///
    /// Malformed bytes, another version, or another source all fail with
    /// [`EventStoreError::InvalidCheckpoint`].
    pub fn decode(checkpoint: &Checkpoint, source_id: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(checkpoint.as_bytes())
            .map_err(|e| EventStoreError::InvalidCheckpoint(format!("malformed checkpoint: {e}")))?;

        if envelope.v != CHECKPOINT_FORMAT_VERSION {
            return Err(EventStoreError::InvalidCheckpoint(format!(
                "unsupported checkpoint version {}",
                envelope.v
            )));
        }
        if envelope.source != source_id {
            return Err(EventStoreError::InvalidCheckpoint(format!(
                "checkpoint was produced by '{}', not '{}'",
                envelope.source, source_id
            )));
        }

        let position: FeedPosition = serde_json::from_value(envelope.body)
            .map_err(|e| EventStoreError::InvalidCheckpoint(format!("malformed position: {e}")))?;
        if position.max_items == 0 {
            return Err(EventStoreError::InvalidCheckpoint(
                "max_items must be positive".to_string(),
            ));
        }
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AggregateId;

    fn position() -> FeedPosition {
        FeedPosition {
            filter: FeedFilter::new().aggregate_id(AggregateId::new()).partition_key("p1"),
            max_items: 25,
            partition: 3,
            continuation: Some("50".to_string()),
            skip: 7,
        }
    }

    #[test]
    fn checkpoint_survives_byte_persistence() {
        let original = position();
        let checkpoint = original.encode("memory").unwrap();

        let restored = Checkpoint::from_bytes(checkpoint.as_bytes().to_vec());
        assert_eq!(FeedPosition::decode(&restored, "memory").unwrap(), original);
    }

    #[test]
    fn foreign_source_is_rejected() {
        let checkpoint = position().encode("postgres").unwrap();
        assert!(matches!(
            FeedPosition::decode(&checkpoint, "memory"),
            Err(EventStoreError::InvalidCheckpoint(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let checkpoint = Checkpoint::from_bytes(b"not a checkpoint".to_vec());
        assert!(matches!(
            FeedPosition::decode(&checkpoint, "memory"),
            Err(EventStoreError::InvalidCheckpoint(_))
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "v": CHECKPOINT_FORMAT_VERSION + 1,
            "source": "memory",
            "body": serde_json::to_value(position()).unwrap(),
        }))
        .unwrap();

        let err = FeedPosition::decode(&Checkpoint::from_bytes(bytes), "memory").unwrap_err();
        assert!(err.to_string().contains("unsupported checkpoint version"));
    }

    #[test]
    fn zero_max_items_is_rejected() {
        let mut bad = position();
        bad.max_items = 0;
        let checkpoint = bad.encode("memory").unwrap();
        assert!(FeedPosition::decode(&checkpoint, "memory").is_err());
    }
}
