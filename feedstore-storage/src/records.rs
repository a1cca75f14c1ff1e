//! Persisted schema.
//!
//! The engine stores owned values: a [`CacheRecord`] owns its ordered list of
//! [`FeedImageRecord`]s, nothing is shared between records. Identifiers and
//! URLs are kept as strings so a corrupted row can still be loaded and then
//! rejected by the mapper.

use feedstore_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Persisted shape of one feed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedImageRecord {
    pub id: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: String,
}

/// Persisted shape of the single cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub timestamp: Timestamp,
    pub feed: Vec<FeedImageRecord>,
}
