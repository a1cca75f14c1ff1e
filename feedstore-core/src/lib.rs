//! Feedstore Core - Domain Types
//!
//! Pure data structures shared by every feedstore crate: the feed image model,
//! the cached feed value, the error taxonomy, store configuration and the
//! completion-based [`FeedStore`] contract. No engine code lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod store;

pub use config::{Schema, StoreConfiguration, StoreLocation};
pub use error::{ConfigError, ConversionError, FeedStoreError, FeedStoreResult, StorageError};
pub use store::{
    DeletionCompletion, FeedStore, InsertionCompletion, RetrievalCompletion,
    RetrieveCachedFeedResult,
};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
///
/// Stored and compared at full (nanosecond) precision.
pub type Timestamp = DateTime<Utc>;

/// Identifier of a single feed image.
pub type FeedImageId = Uuid;

// ============================================================================
// FEED MODEL
// ============================================================================

/// One catalog entry of a feed.
///
/// Valid by construction: the identifier is a typed UUID and the URL has
/// already been parsed as an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedImage {
    pub id: FeedImageId,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Url,
}

impl FeedImage {
    pub fn new(
        id: FeedImageId,
        description: Option<String>,
        location: Option<String>,
        url: Url,
    ) -> Self {
        Self {
            id,
            description,
            location,
            url,
        }
    }
}

/// The single cache entry: a feed snapshot and the instant it was saved.
///
/// Order of `feed` is significant and preserved exactly through persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFeed {
    pub feed: Vec<FeedImage>,
    pub timestamp: Timestamp,
}

impl CachedFeed {
    pub fn new(feed: Vec<FeedImage>, timestamp: Timestamp) -> Self {
        Self { feed, timestamp }
    }
}
