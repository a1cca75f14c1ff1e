//! The cache-store contract consumed by the feed caching policy layer.
//!
//! All three operations are asynchronous: they return immediately and deliver
//! their outcome through a completion invoked exactly once.

use crate::{CachedFeed, FeedImage, FeedStoreResult, Timestamp};

/// Outcome of a retrieval.
///
/// - `Ok(None)`: nothing is cached
/// - `Ok(Some(cached))`: the stored feed and its timestamp
/// - `Err(e)`: the store could not be read or its contents could not be mapped
pub type RetrieveCachedFeedResult = FeedStoreResult<Option<CachedFeed>>;

pub type DeletionCompletion = Box<dyn FnOnce(FeedStoreResult<()>) + Send + 'static>;
pub type InsertionCompletion = Box<dyn FnOnce(FeedStoreResult<()>) + Send + 'static>;
pub type RetrievalCompletion = Box<dyn FnOnce(RetrieveCachedFeedResult) + Send + 'static>;

/// Persistent single-slot cache for a feed snapshot.
///
/// Implementations must run mutations in submission order and must never
/// expose a partially applied mutation to a reader.
pub trait FeedStore: Send + Sync {
    /// Delete the cached feed, if any. Succeeds on an empty store.
    fn delete_cached_feed(&self, completion: DeletionCompletion);

    /// Atomically replace the cached feed with `feed` saved at `timestamp`.
    fn insert(&self, feed: Vec<FeedImage>, timestamp: Timestamp, completion: InsertionCompletion);

    /// Read the cached feed. Has no side effects on stored data.
    fn retrieve(&self, completion: RetrievalCompletion);
}
